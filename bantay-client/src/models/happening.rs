use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mirror::data_model::Record;

use crate::AppError;
use crate::search::Searchable;

/// The districts of the City of Manila, in the order the region tabs show them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Region {
    Tondo,
    Binondo,
    Quiapo,
    Sampaloc,
    Malate,
    Ermita,
    Paco,
    Pandacan,
    #[serde(rename = "Santa Ana")]
    SantaAna,
    #[serde(rename = "San Miguel")]
    SanMiguel,
    #[serde(rename = "San Andres")]
    SanAndres,
    Intramuros,
    #[serde(rename = "Santa Cruz")]
    SantaCruz,
    #[serde(rename = "Santa Mesa")]
    SantaMesa,
    #[serde(rename = "Port Area")]
    PortArea,
    #[serde(rename = "San Nicolas")]
    SanNicolas,
}

impl Region {
    pub const ALL: [Region; 16] = [
        Region::Tondo,
        Region::Binondo,
        Region::Quiapo,
        Region::Sampaloc,
        Region::Malate,
        Region::Ermita,
        Region::Paco,
        Region::Pandacan,
        Region::SantaAna,
        Region::SanMiguel,
        Region::SanAndres,
        Region::Intramuros,
        Region::SantaCruz,
        Region::SantaMesa,
        Region::PortArea,
        Region::SanNicolas,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Region::Tondo => "Tondo",
            Region::Binondo => "Binondo",
            Region::Quiapo => "Quiapo",
            Region::Sampaloc => "Sampaloc",
            Region::Malate => "Malate",
            Region::Ermita => "Ermita",
            Region::Paco => "Paco",
            Region::Pandacan => "Pandacan",
            Region::SantaAna => "Santa Ana",
            Region::SanMiguel => "San Miguel",
            Region::SanAndres => "San Andres",
            Region::Intramuros => "Intramuros",
            Region::SantaCruz => "Santa Cruz",
            Region::SantaMesa => "Santa Mesa",
            Region::PortArea => "Port Area",
            Region::SanNicolas => "San Nicolas",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Region {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|region| region.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::validation(format!("unknown region `{s}`")))
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Happening {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub region: Region,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Happening {
    type Id = i64;
    type Partition = Region;

    const TABLE: &'static str = "happenings";
    const PARTITION_FIELD: &'static str = "region";

    fn id(&self) -> i64 {
        self.id
    }

    fn partition(&self) -> Region {
        self.region
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Searchable for Happening {
    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HappeningDraft {
    pub title: String,
    pub content: String,
}

impl HappeningDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        super::require("Title", &self.title)?;
        super::require("Content", &self.content)
    }

    pub fn to_json(&self, region: Region, image: Option<&str>) -> serde_json::Value {
        let mut row = serde_json::json!({
            "title": self.title,
            "content": self.content,
            "region": region,
        });
        if let Some(image) = image {
            row["image"] = serde_json::Value::from(image);
        }
        row
    }
}

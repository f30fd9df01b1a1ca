use chrono::{DateTime, Utc};
use mirror::data_model::Record;

use crate::search::Searchable;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewsArticle {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewsArticle {
    /// e.g. "November 06, 2024".
    pub fn formatted_date(&self) -> String {
        self.created_at.format("%B %d, %Y").to_string()
    }
}

impl Record for NewsArticle {
    type Id = i64;
    // News isn't grouped; every article counts toward one partition.
    type Partition = ();

    const TABLE: &'static str = "news";
    const PARTITION_FIELD: &'static str = "id";

    fn id(&self) -> i64 {
        self.id
    }

    fn partition(&self) {}

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl Searchable for NewsArticle {
    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> &str {
        &self.content
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mirror::data_model::Record;

use crate::AppError;
use crate::search::Searchable;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    News,
    Alert,
    Hotline,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::News, Category::Alert, Category::Hotline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::News => "news",
            Category::Alert => "alert",
            Category::Hotline => "hotline",
        }
    }

    /// Only news posts carry an image.
    pub fn has_image(&self) -> bool {
        matches!(self, Category::News)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("unknown category `{s}`")))
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Post {
    type Id = i64;
    type Partition = Category;

    const TABLE: &'static str = "posts";
    const PARTITION_FIELD: &'static str = "category";

    fn id(&self) -> i64 {
        self.id
    }

    fn partition(&self) -> Category {
        self.category
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Searchable for Post {
    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> &str {
        &self.content
    }
}

/// A post as typed into the create form.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PostDraft {
    pub fn new(category: Category, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category,
            image: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        super::require("Title", &self.title)?;
        super::require("Content", &self.content)
    }
}

/// The editable fields of an existing post.
#[derive(Clone, Debug, PartialEq)]
pub struct PostPatch {
    pub title: String,
    pub content: String,
}

impl PostPatch {
    pub fn validate(&self) -> Result<(), AppError> {
        super::require("Title", &self.title)?;
        super::require("Content", &self.content)
    }

    /// The JSON body of the update. `image` is only written for news posts; other categories
    /// never touch the column.
    pub fn to_json(&self, category: Category, image: Option<&str>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "title": self.title,
            "content": self.content,
        });
        if category.has_image() {
            body["image"] = image.map_or(serde_json::Value::Null, serde_json::Value::from);
        }
        body
    }

    /// What the post looks like after the update, for applying it locally before the change
    /// feed echoes it back.
    pub fn applied_to(&self, post: &Post, image: Option<&str>) -> Post {
        Post {
            title: self.title.clone(),
            content: self.content.clone(),
            image: if post.category.has_image() {
                image.map(str::to_string)
            } else {
                post.image.clone()
            },
            ..post.clone()
        }
    }
}

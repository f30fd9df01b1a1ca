#[path = "1-record.rs"]
mod record;

#[path = "2-change-event.rs"]
mod change_event;

#[path = "3-partition-counts.rs"]
mod partition_counts;

#[path = "4-projection.rs"]
mod projection;

#[path = "5-reconciler.rs"]
mod reconciler;

#[path = "6-dirty-tracker.rs"]
mod dirty_tracker;

#[path = "7-projection-store.rs"]
mod projection_store;

pub use change_event::*;
pub use dirty_tracker::*;
pub use partition_counts::*;
pub use projection::*;
pub use projection_store::*;
pub use reconciler::*;
pub use record::*;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ListenerKey(pub(crate) slotmap::DefaultKey);

#[cfg(test)]
pub(crate) mod test_support {
    use super::Record;

    /// A minimal row: an id, a category to partition by, and an optional timestamp.
    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    pub struct Row {
        pub id: i64,
        pub category: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    }

    impl Row {
        pub fn new(id: i64, category: &str) -> Self {
            Self {
                id,
                category: category.to_string(),
                created_at: None,
            }
        }

        /// A row created `secs` seconds after the epoch.
        pub fn at(id: i64, category: &str, secs: i64) -> Self {
            Self {
                created_at: chrono::DateTime::from_timestamp(secs, 0),
                ..Self::new(id, category)
            }
        }
    }

    impl Record for Row {
        type Id = i64;
        type Partition = String;

        const TABLE: &'static str = "rows";
        const PARTITION_FIELD: &'static str = "category";

        fn id(&self) -> i64 {
            self.id
        }

        fn partition(&self) -> String {
            self.category.clone()
        }

        fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
            self.created_at
        }
    }
}

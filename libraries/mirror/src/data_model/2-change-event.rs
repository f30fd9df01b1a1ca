//! # ChangeEvent
//! Backends deliver row mutations as loosely-shaped payloads (`{type, record, old_record}` and so
//! on). They arrive here as a [`RawChange`], which is still untyped JSON, and are checked once at
//! the boundary by [`RawChange::decode`]. Everything past that point only sees the closed
//! [`ChangeEvent`] type.

use crate::backend::DecodeError;
use crate::data_model::{Record, id_from_json};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

/// A row mutation as delivered by a change feed, before validation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub table: String,
    /// The row after the mutation. Absent for deletes.
    pub record: Option<serde_json::Value>,
    /// The row before the mutation. Often only carries the primary key.
    pub old_record: Option<serde_json::Value>,
    pub commit_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl RawChange {
    pub fn insert(table: impl Into<String>, record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table: table.into(),
            record: Some(record),
            old_record: None,
            commit_timestamp: None,
        }
    }

    pub fn update(
        table: impl Into<String>,
        record: serde_json::Value,
        old_record: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: ChangeKind::Update,
            table: table.into(),
            record: Some(record),
            old_record,
            commit_timestamp: None,
        }
    }

    pub fn delete(table: impl Into<String>, old_record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table: table.into(),
            record: None,
            old_record: Some(old_record),
            commit_timestamp: None,
        }
    }

    /// The row the change is "about": the new row for inserts and updates, the old one for
    /// deletes.
    pub fn subject(&self) -> Option<&serde_json::Value> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => self.record.as_ref(),
            ChangeKind::Delete => self.old_record.as_ref(),
        }
    }

    pub fn decode<R: Record>(&self) -> Result<ChangeEvent<R>, DecodeError> {
        match self.kind {
            ChangeKind::Insert => {
                let record = self.record.as_ref().ok_or(DecodeError::MissingRecord {
                    kind: self.kind,
                })?;
                Ok(ChangeEvent::Insert(R::from_json(record)?))
            }
            ChangeKind::Update => {
                let record = self.record.as_ref().ok_or(DecodeError::MissingRecord {
                    kind: self.kind,
                })?;
                // A partial old row (key only) is normal, so it is only kept when it is complete.
                let prior = self
                    .old_record
                    .as_ref()
                    .and_then(|old| R::from_json(old).ok());
                Ok(ChangeEvent::Update {
                    record: R::from_json(record)?,
                    prior,
                })
            }
            ChangeKind::Delete => {
                let old = self.old_record.as_ref().ok_or(DecodeError::MissingRecord {
                    kind: self.kind,
                })?;
                let id = id_from_json::<R>(old).ok_or(DecodeError::MissingId {
                    field: R::ID_FIELD,
                })??;
                Ok(ChangeEvent::Delete {
                    id,
                    prior: R::from_json(old).ok(),
                })
            }
        }
    }
}

/// A validated row mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent<R: Record> {
    Insert(R),
    Update { record: R, prior: Option<R> },
    Delete { id: R::Id, prior: Option<R> },
}

impl<R: Record> ChangeEvent<R> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn id(&self) -> R::Id {
        match self {
            ChangeEvent::Insert(record) | ChangeEvent::Update { record, .. } => record.id(),
            ChangeEvent::Delete { id, .. } => id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::test_support::Row;
    use serde_json::json;

    #[test]
    fn test_insert_decodes_full_row() {
        let raw = RawChange::insert("rows", json!({"id": 2, "category": "alert"}));
        let event = raw.decode::<Row>().unwrap();
        assert_eq!(event, ChangeEvent::Insert(Row::new(2, "alert")));
    }

    #[test]
    fn test_delete_with_key_only_old_row() {
        let raw = RawChange::delete("rows", json!({"id": 7}));
        let event = raw.decode::<Row>().unwrap();
        assert_eq!(event, ChangeEvent::Delete { id: 7, prior: None });
    }

    #[test]
    fn test_delete_with_full_old_row_keeps_prior() {
        let raw = RawChange::delete("rows", json!({"id": 7, "category": "news"}));
        let event = raw.decode::<Row>().unwrap();
        assert_eq!(
            event,
            ChangeEvent::Delete {
                id: 7,
                prior: Some(Row::new(7, "news"))
            }
        );
    }

    #[test]
    fn test_update_without_new_row_is_rejected() {
        let raw = RawChange {
            kind: ChangeKind::Update,
            table: "rows".to_string(),
            record: None,
            old_record: Some(json!({"id": 1})),
            commit_timestamp: None,
        };
        assert!(matches!(
            raw.decode::<Row>(),
            Err(DecodeError::MissingRecord {
                kind: ChangeKind::Update
            })
        ));
    }

    #[test]
    fn test_delete_without_id_is_rejected() {
        let raw = RawChange::delete("rows", json!({"category": "news"}));
        assert!(matches!(
            raw.decode::<Row>(),
            Err(DecodeError::MissingId { field: "id" })
        ));
    }

    #[test]
    fn test_malformed_row_is_rejected() {
        let raw = RawChange::insert("rows", json!({"id": "not-a-number", "category": "news"}));
        assert!(matches!(raw.decode::<Row>(), Err(DecodeError::Row(_))));
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(
            "TRUNCATE".parse::<ChangeKind>(),
            Err(DecodeError::UnknownKind(kind)) if kind == "TRUNCATE"
        ));
        assert_eq!("DELETE".parse::<ChangeKind>().unwrap(), ChangeKind::Delete);
    }
}

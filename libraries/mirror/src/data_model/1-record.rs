//! # Record
//! A record is one row of a remote table, as seen by the client. Every record has a stable id and
//! a "partition" field that screens group by (a post's category, a happening's region).
//! Records cross the wire as JSON, so the trait also fixes how a row is (de)serialized.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait Record: Clone + Debug + Serialize + DeserializeOwned + 'static {
    type Id: Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned;
    type Partition: Clone + Ord + Debug + Serialize;

    /// Name of the remote table rows are read from.
    const TABLE: &'static str;
    const ID_FIELD: &'static str = "id";
    const PARTITION_FIELD: &'static str;

    fn id(&self) -> Self::Id;

    fn partition(&self) -> Self::Partition;

    /// Used by time-ordered placements. Rows without a timestamp sort as oldest.
    fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn from_json(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json.clone())
    }
}

/// Pulls a record's id out of a (possibly partial) row.
///
/// Delete events usually carry only the primary key of the old row, so this must not require the
/// rest of the record to be present.
pub fn id_from_json<R: Record>(json: &serde_json::Value) -> Option<Result<R::Id, serde_json::Error>> {
    json.get(R::ID_FIELD)
        .filter(|id| !id.is_null())
        .map(|id| serde_json::from_value(id.clone()))
}

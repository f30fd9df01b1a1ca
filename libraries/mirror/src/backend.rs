//! The seams between a projection and whatever hosts the real tables.
//!
//! Backends only deal in JSON rows; typing happens in the loader and in [`RawChange::decode`].
//!
//! [`RawChange::decode`]: crate::data_model::RawChange::decode

use serde_json::Value;

use crate::data_model::ChangeKind;
use crate::feed::Subscription;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("query on `{table}` failed: {message}")]
    Backend { table: String, message: String },
    #[error("could not decode a `{table}` row: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("write to `{table}` was rejected: {message}")]
    Rejected { table: String, message: String },
    #[error("could not encode row for `{table}`: {source}")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("could not reach the change feed: {0}")]
    Connect(String),
    #[error("subscription to `{table}` was refused: {message}")]
    Rejected { table: String, message: String },
    #[error("timed out joining the `{table}` change feed")]
    Timeout { table: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("could not read upload source: {0}")]
    Read(#[from] std::io::Error),
    #[error("upload of `{bucket}/{key}` was rejected: {message}")]
    Rejected {
        bucket: String,
        key: String,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RemovalError {
    #[error("removal of `{bucket}/{key}` was rejected: {message}")]
    Rejected {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("`{0}` is not an object in this storage")]
    NotAnObject(String),
}

/// A change payload that failed validation at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown change kind `{0}`")]
    UnknownKind(String),
    #[error("{} event without a row", .kind.as_str())]
    MissingRecord { kind: ChangeKind },
    #[error("old row carries no `{field}`")]
    MissingId { field: &'static str },
    #[error("malformed row: {0}")]
    Row(#[from] serde_json::Error),
    #[error("malformed payload: {0}")]
    Payload(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Gte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
        }
    }
}

/// A single column condition, e.g. `region = 'Tondo'` or `created_at >= '2024-11-01'`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Gte,
            value: value.into(),
        }
    }

    /// The filter value as it appears in a query string: strings bare, everything else as JSON.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Evaluates the filter against a JSON row. A missing column never matches.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(actual) = row.get(&self.column) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Gte => compare_values(actual, &self.value)
                .is_some_and(|ordering| ordering != std::cmp::Ordering::Less),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Numbers compare numerically, timestamps chronologically, other strings lexically.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// A read against one table.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Select {
    pub table: String,
    /// Comma separated column list, `*` for all.
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Which mutations a subscription wants to hear about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventKinds {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventKinds {
    pub fn includes(&self, kind: ChangeKind) -> bool {
        match self {
            EventKinds::All => true,
            EventKinds::Only(only) => *only == kind,
        }
    }

    /// The name change feeds use for this selection: `*` or the uppercase kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKinds::All => "*",
            EventKinds::Only(kind) => kind.as_str(),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait QueryBackend {
    async fn select(&self, select: &Select) -> Result<Vec<Value>, FetchError>;
}

#[allow(async_fn_in_trait)]
pub trait MutationBackend {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), MutationError>;

    async fn update(
        &self,
        table: &str,
        key: &Filter,
        patch: Value,
    ) -> Result<(), MutationError>;

    async fn delete(&self, table: &str, key: &Filter) -> Result<(), MutationError>;
}

#[allow(async_fn_in_trait)]
pub trait ChangeFeed {
    /// Opens a subscription to one table's changes. Events for rows that don't pass `filter` are
    /// not delivered.
    async fn subscribe(
        &self,
        table: &str,
        kinds: EventKinds,
        filter: Option<&Filter>,
    ) -> Result<Subscription, SubscriptionError>;
}

#[allow(async_fn_in_trait)]
pub trait BlobStorage {
    /// Stores the bytes under `bucket/key`, overwriting any existing object, and returns the
    /// object's public URL.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, UploadError>;

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), RemovalError>;

    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// Recovers the object key from a URL produced by [`BlobStorage::public_url`].
    fn key_from_public_url(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = self.public_url(bucket, "");
        url.strip_prefix(&prefix)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

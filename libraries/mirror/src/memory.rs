//! An in-memory backend. It behaves like a hosted table service closely enough to drive screens
//! in tests and demos: ids and `created_at` are assigned on insert, every mutation is broadcast to
//! subscribers of the table, and any operation can be made to fail once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::channel::mpsc::{self, UnboundedSender};
use serde_json::{Map, Value};

use crate::backend::{
    BlobStorage, ChangeFeed, EventKinds, FetchError, Filter, MutationBackend, MutationError,
    QueryBackend, RemovalError, Select, SubscriptionError, UploadError, compare_values,
};
use crate::data_model::{ChangeKind, RawChange};
use crate::feed::Subscription;

const PUBLIC_URL_BASE: &str = "memory://storage/object/public";

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Value>>,
    subscribers: slotmap::SlotMap<slotmap::DefaultKey, Subscriber>,
    objects: BTreeMap<(String, String), StoredObject>,
    failures: Failures,
    /// Whether change events carry the whole old row, or only its key.
    full_old_rows: bool,
}

struct Subscriber {
    table: String,
    kinds: EventKinds,
    filter: Option<Filter>,
    events: UnboundedSender<RawChange>,
}

#[derive(Default)]
struct Failures {
    select: Option<String>,
    mutation: Option<String>,
    subscribe: Option<String>,
    upload: Option<String>,
    remove: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl MemoryBackend {
    /// Change events for updates and deletes will carry the full old row instead of just the key.
    pub fn with_full_old_rows(self) -> Self {
        self.lock().full_old_rows = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts rows into a table as-is, without telling subscribers.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|_, s| !s.events.is_closed());
        inner
            .subscribers
            .values()
            .filter(|s| s.table == table)
            .count()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys of every object in `bucket`, in order.
    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Delivers a change to subscribers without touching any table. Useful for replaying
    /// duplicate or out-of-order deliveries.
    pub fn emit(&self, change: RawChange) {
        self.lock().broadcast(change);
    }

    /// Ends every open subscription, as if the connection dropped.
    pub fn disconnect_all(&self) {
        self.lock().subscribers.clear();
    }

    pub fn fail_next_select(&self, message: &str) {
        self.lock().failures.select = Some(message.to_string());
    }

    pub fn fail_next_mutation(&self, message: &str) {
        self.lock().failures.mutation = Some(message.to_string());
    }

    pub fn fail_next_subscribe(&self, message: &str) {
        self.lock().failures.subscribe = Some(message.to_string());
    }

    pub fn fail_next_upload(&self, message: &str) {
        self.lock().failures.upload = Some(message.to_string());
    }

    pub fn fail_next_remove(&self, message: &str) {
        self.lock().failures.remove = Some(message.to_string());
    }
}

impl Inner {
    fn broadcast(&mut self, change: RawChange) {
        self.subscribers.retain(|_, subscriber| {
            if subscriber.table != change.table || !subscriber.kinds.includes(change.kind) {
                return !subscriber.events.is_closed();
            }
            // Old rows of deletes can't be filtered on, so deletes always go out.
            let wanted = match (&subscriber.filter, change.kind) {
                (Some(filter), ChangeKind::Insert | ChangeKind::Update) => change
                    .record
                    .as_ref()
                    .is_some_and(|record| filter.matches(record)),
                _ => true,
            };
            if !wanted {
                return !subscriber.events.is_closed();
            }
            subscriber.events.unbounded_send(change.clone()).is_ok()
        });
    }

    fn old_row(&self, row: &Value, key: &Filter) -> Value {
        if self.full_old_rows {
            return row.clone();
        }
        let mut old = Map::new();
        if let Some(id) = row.get(&key.column) {
            old.insert(key.column.clone(), id.clone());
        }
        Value::Object(old)
    }

    fn next_id(&self, table: &str) -> i64 {
        self.tables
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }
}

fn project_columns(row: &Value, columns: &str) -> Value {
    if columns.trim() == "*" {
        return row.clone();
    }
    let mut projected = Map::new();
    for column in columns.split(',').map(str::trim) {
        if let Some(value) = row.get(column) {
            projected.insert(column.to_string(), value.clone());
        }
    }
    Value::Object(projected)
}

impl QueryBackend for MemoryBackend {
    async fn select(&self, select: &Select) -> Result<Vec<Value>, FetchError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.select.take() {
            return Err(FetchError::Backend {
                table: select.table.clone(),
                message,
            });
        }

        let mut rows: Vec<Value> = inner
            .tables
            .get(&select.table)
            .into_iter()
            .flatten()
            .filter(|row| select.filters.iter().all(|f| f.matches(row)))
            .cloned()
            .collect();

        if let Some(order) = &select.order {
            rows.sort_by(|a, b| {
                let ordering = match (a.get(&order.column), b.get(&order.column)) {
                    (Some(a), Some(b)) => compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = select.limit {
            rows.truncate(limit);
        }

        Ok(rows
            .iter()
            .map(|row| project_columns(row, &select.columns))
            .collect())
    }
}

impl MutationBackend for MemoryBackend {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), MutationError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.mutation.take() {
            return Err(MutationError::Rejected {
                table: table.to_string(),
                message,
            });
        }

        for row in rows {
            let Value::Object(mut row) = row else {
                return Err(MutationError::Rejected {
                    table: table.to_string(),
                    message: "row is not an object".to_string(),
                });
            };
            if !row.contains_key("id") {
                row.insert("id".to_string(), Value::from(inner.next_id(table)));
            }
            if !row.contains_key("created_at") {
                row.insert(
                    "created_at".to_string(),
                    Value::from(chrono::Utc::now().to_rfc3339()),
                );
            }
            let row = Value::Object(row);
            inner
                .tables
                .entry(table.to_string())
                .or_default()
                .push(row.clone());
            inner.broadcast(RawChange::insert(table, row));
        }
        Ok(())
    }

    async fn update(&self, table: &str, key: &Filter, patch: Value) -> Result<(), MutationError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.mutation.take() {
            return Err(MutationError::Rejected {
                table: table.to_string(),
                message,
            });
        }
        let Value::Object(patch) = patch else {
            return Err(MutationError::Rejected {
                table: table.to_string(),
                message: "patch is not an object".to_string(),
            });
        };

        let mut changes = Vec::new();
        for row in inner.tables.entry(table.to_string()).or_default().iter_mut() {
            if !key.matches(row) {
                continue;
            }
            let old = row.clone();
            if let Value::Object(fields) = row {
                for (column, value) in &patch {
                    fields.insert(column.clone(), value.clone());
                }
            }
            changes.push((row.clone(), old));
        }
        for (row, old) in changes {
            let old = inner.old_row(&old, key);
            inner.broadcast(RawChange::update(table, row, Some(old)));
        }
        Ok(())
    }

    async fn delete(&self, table: &str, key: &Filter) -> Result<(), MutationError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.mutation.take() {
            return Err(MutationError::Rejected {
                table: table.to_string(),
                message,
            });
        }

        let rows = inner.tables.entry(table.to_string()).or_default();
        let (removed, kept): (Vec<Value>, Vec<Value>) =
            std::mem::take(rows).into_iter().partition(|row| key.matches(row));
        *rows = kept;
        for row in removed {
            let old = inner.old_row(&row, key);
            inner.broadcast(RawChange::delete(table, old));
        }
        Ok(())
    }
}

impl ChangeFeed for MemoryBackend {
    async fn subscribe(
        &self,
        table: &str,
        kinds: EventKinds,
        filter: Option<&Filter>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.subscribe.take() {
            return Err(SubscriptionError::Rejected {
                table: table.to_string(),
                message,
            });
        }

        let (events, receiver) = mpsc::unbounded();
        let key = inner.subscribers.insert(Subscriber {
            table: table.to_string(),
            kinds,
            filter: filter.cloned(),
            events,
        });

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(table, receiver, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscribers
                    .remove(key);
            }
        }))
    }
}

impl BlobStorage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.upload.take() {
            return Err(UploadError::Rejected {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message,
            });
        }
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(self.public_url(bucket, key))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), RemovalError> {
        let mut inner = self.lock();
        if let Some(message) = inner.failures.remove.take() {
            return Err(RemovalError::Rejected {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message,
            });
        }
        inner
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{PUBLIC_URL_BASE}/{bucket}/{key}")
    }
}

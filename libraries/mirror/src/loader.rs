//! Snapshot loading: one read of the rows a projection starts from.

use crate::backend::{FetchError, QueryBackend, Select};
use crate::data_model::{PartitionCounts, Record};

/// Fetches and decodes every row matching `select`, in the order the backend returns them.
///
/// Rows that don't decode (an unknown category, a null in a required column) are logged and
/// left out, so one bad row can't blank the whole screen. [`load_partition_counts`] still reads
/// them: `verify_counts` reports a skipped row as drift, or as a decode error when its
/// partition value itself is unknown.
pub async fn load_snapshot<R: Record, B: QueryBackend>(
    backend: &B,
    select: &Select,
) -> Result<Vec<R>, FetchError> {
    let rows = backend.select(select).await?;
    let total = rows.len();
    let records: Vec<R> = rows
        .iter()
        .filter_map(|row| {
            R::from_json(row)
                .inspect_err(|e| {
                    let id = row.get(R::ID_FIELD).unwrap_or(&serde_json::Value::Null);
                    log::warn!("Skipping undecodable {} row {id}: {e}", select.table);
                })
                .ok()
        })
        .collect();
    if records.len() < total {
        log::warn!(
            "Loaded {} of {total} {} rows",
            records.len(),
            select.table
        );
    }
    Ok(records)
}

/// Counts rows per partition straight from the backend, reading only the partition column.
///
/// Counts shown on screen come from the projection itself. This is the independent aggregate to
/// check them against.
pub async fn load_partition_counts<R: Record, B: QueryBackend>(
    backend: &B,
    select: &Select,
    seed: impl IntoIterator<Item = R::Partition>,
) -> Result<PartitionCounts<R::Partition>, FetchError>
where
    R::Partition: serde::de::DeserializeOwned,
{
    let select = select.clone().columns(R::PARTITION_FIELD);
    let rows = backend.select(&select).await?;
    let mut counts = PartitionCounts::seeded(seed);
    for row in rows {
        let value = row
            .get(R::PARTITION_FIELD)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let partition = serde_json::from_value::<R::Partition>(value).map_err(|source| {
            FetchError::Decode {
                table: select.table.clone(),
                source,
            }
        })?;
        counts.increment(partition);
    }
    Ok(counts)
}

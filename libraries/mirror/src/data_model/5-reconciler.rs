//! # Reconciler
//! Applies validated change events to a projection and its partition counts.
//!
//! Rules, per event:
//! - Insert, row not present: place it, count its partition.
//! - Insert, row already present (the feed delivered it twice, or it was also in the snapshot):
//!   replace it in place. Counts only move if the partition changed.
//! - Update, row present: replace in place and move the count if the partition changed.
//! - Insert or update whose new version no longer passes the filter: the row leaves.
//! - Update, row absent: if the new version passes the filter, the row enters the projection.
//! - Delete, row present: remove it and uncount its partition. Row absent: nothing happens.
//!
//! Counts are only touched when a row enters, leaves, or moves, so they always equal the rows
//! grouped by partition.

use crate::AppState;
use crate::backend::Filter;
use crate::data_model::{ChangeEvent, PartitionCounts, Placement, Projection, Record};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied<P> {
    /// A new row was placed.
    Inserted { partition: P },
    /// A row the projection already had was replaced by an insert for the same id.
    Refreshed { moved: Option<(P, P)> },
    /// A present row was replaced. `moved` is `(from, to)` when its partition changed.
    Updated { moved: Option<(P, P)> },
    /// An update brought a row into the filtered view.
    Entered { partition: P },
    /// An update took a row out of the filtered view.
    Left { partition: P },
    Removed { partition: P },
    Ignored(Ignored),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ignored {
    /// The row does not pass the projection's filter.
    FilteredOut,
    /// Delete for a row the projection does not hold.
    UnknownRow,
    /// The owning screen already went away.
    TornDown,
}

impl<P> Applied<P> {
    /// Whether rows or counts changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Ignored(_))
    }
}

#[derive(Clone, Debug)]
pub struct ProjectionState<R: Record> {
    projection: Projection<R>,
    counts: PartitionCounts<R::Partition>,
    filters: Vec<Filter>,
}

impl<R: Record> ProjectionState<R> {
    pub fn new(placement: Placement, seed: impl IntoIterator<Item = R::Partition>) -> Self {
        Self {
            projection: Projection::new(placement),
            counts: PartitionCounts::seeded(seed),
            filters: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn projection(&self) -> &Projection<R> {
        &self.projection
    }

    pub fn counts(&self) -> &PartitionCounts<R::Partition> {
        &self.counts
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub(crate) fn set_filters(&mut self, filters: Vec<Filter>) {
        self.filters = filters;
        self.projection.clear();
        self.counts.clear();
    }

    /// Replaces rows and counts with a freshly loaded snapshot.
    ///
    /// Rows that fail the local filter are dropped, and duplicate ids keep their first
    /// occurrence, so counts stay exactly the grouped rows.
    pub fn reset(&mut self, rows: Vec<R>) {
        let mut seen = std::collections::HashSet::new();
        let rows: Vec<R> = rows
            .into_iter()
            .filter(|row| self.passes(row))
            .filter(|row| seen.insert(row.id()))
            .collect();
        self.counts.clear();
        for row in &rows {
            self.counts.increment(row.partition());
        }
        self.projection.reset(rows);
    }

    pub fn passes(&self, record: &R) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        match record.to_json() {
            Ok(json) => self.filters.iter().all(|filter| filter.matches(&json)),
            Err(e) => {
                log::warn!("Could not serialize {} row for filtering: {e:?}", R::TABLE);
                true
            }
        }
    }

    pub fn apply(&mut self, event: &ChangeEvent<R>) -> Applied<R::Partition> {
        match event {
            ChangeEvent::Insert(record) => {
                let passes = self.passes(record);
                match (self.projection.position(&record.id()), passes) {
                    (Some(index), true) => {
                        let moved = self.replace(index, record.clone());
                        Applied::Refreshed { moved }
                    }
                    (Some(_), false) => match self.remove(&record.id()) {
                        Some(partition) => Applied::Left { partition },
                        None => Applied::Ignored(Ignored::UnknownRow),
                    },
                    (None, true) => {
                        let partition = record.partition();
                        self.counts.increment(partition.clone());
                        self.projection.place(record.clone());
                        Applied::Inserted { partition }
                    }
                    (None, false) => Applied::Ignored(Ignored::FilteredOut),
                }
            }
            ChangeEvent::Update { record, .. } => {
                let passes = self.passes(record);
                match (self.projection.position(&record.id()), passes) {
                    (Some(index), true) => {
                        let moved = self.replace(index, record.clone());
                        Applied::Updated { moved }
                    }
                    (Some(_), false) => match self.remove(&record.id()) {
                        Some(partition) => Applied::Left { partition },
                        None => Applied::Ignored(Ignored::UnknownRow),
                    },
                    (None, true) => {
                        let partition = record.partition();
                        self.counts.increment(partition.clone());
                        self.projection.place(record.clone());
                        Applied::Entered { partition }
                    }
                    (None, false) => Applied::Ignored(Ignored::FilteredOut),
                }
            }
            ChangeEvent::Delete { id, .. } => match self.remove(id) {
                Some(partition) => Applied::Removed { partition },
                None => Applied::Ignored(Ignored::UnknownRow),
            },
        }
    }

    fn replace(&mut self, index: usize, record: R) -> Option<(R::Partition, R::Partition)> {
        let to = record.partition();
        let old = self.projection.replace_at(index, record);
        let from = old.partition();
        if from == to {
            return None;
        }
        self.counts.decrement(from.clone());
        self.counts.increment(to.clone());
        Some((from, to))
    }

    fn remove(&mut self, id: &R::Id) -> Option<R::Partition> {
        let removed = self.projection.remove(id)?;
        let partition = removed.partition();
        self.counts.decrement(partition.clone());
        Some(partition)
    }
}

impl<R: Record> AppState for ProjectionState<R> {
    type Event = ChangeEvent<R>;

    fn apply_event(mut self, event: &Self::Event) -> Self {
        self.apply(event);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::test_support::Row;
    use serde_json::json;

    fn state(rows: Vec<Row>) -> ProjectionState<Row> {
        let mut state = ProjectionState::new(
            Placement::Append,
            ["news", "alert", "hotline"].map(String::from),
        );
        state.reset(rows);
        state
    }

    fn count(state: &ProjectionState<Row>, partition: &str) -> usize {
        state.counts().get(&partition.to_string())
    }

    #[test]
    fn test_insert_into_snapshot() {
        let mut state = state(vec![Row::new(1, "news")]);
        let applied = state.apply(&ChangeEvent::Insert(Row::new(2, "alert")));

        assert_eq!(
            applied,
            Applied::Inserted {
                partition: "alert".to_string()
            }
        );
        let ids: Vec<i64> = state.projection().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(count(&state, "news"), 1);
        assert_eq!(count(&state, "alert"), 1);
        assert_eq!(count(&state, "hotline"), 0);
    }

    #[test]
    fn test_unique_inserts_are_all_counted() {
        let mut state = state(vec![]);
        let categories = ["news", "alert", "hotline", "news", "news", "alert"];
        for (id, category) in categories.iter().enumerate() {
            state.apply(&ChangeEvent::Insert(Row::new(id as i64, category)));
        }
        assert_eq!(state.projection().len(), categories.len());
        assert_eq!(state.counts().total(), categories.len());
        assert_eq!(count(&state, "news"), 3);
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut state = state(vec![]);
        let event = ChangeEvent::Insert(Row::new(4, "news"));
        state.apply(&event);
        let applied = state.apply(&event);

        assert_eq!(applied, Applied::Refreshed { moved: None });
        assert_eq!(state.projection().len(), 1);
        assert_eq!(count(&state, "news"), 1);
    }

    #[test]
    fn test_delete_restores_pre_insert_state() {
        let mut state = state(vec![Row::new(1, "news")]);
        state.apply(&ChangeEvent::Insert(Row::new(2, "hotline")));
        state.apply(&ChangeEvent::Delete { id: 2, prior: None });

        let ids: Vec<i64> = state.projection().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(count(&state, "hotline"), 0);
        assert_eq!(count(&state, "news"), 1);
    }

    #[test]
    fn test_repeated_delete_is_noop() {
        let mut state = state(vec![Row::new(1, "news")]);
        let delete = ChangeEvent::Delete { id: 1, prior: None };

        assert_eq!(
            state.apply(&delete),
            Applied::Removed {
                partition: "news".to_string()
            }
        );
        assert!(state.projection().is_empty());
        assert_eq!(count(&state, "news"), 0);

        assert_eq!(state.apply(&delete), Applied::Ignored(Ignored::UnknownRow));
        assert!(state.projection().is_empty());
        assert_eq!(count(&state, "news"), 0);
    }

    #[test]
    fn test_update_moves_partition() {
        let mut state = state(vec![Row::new(5, "news")]);
        let applied = state.apply(&ChangeEvent::Update {
            record: Row::new(5, "alert"),
            prior: None,
        });

        assert_eq!(
            applied,
            Applied::Updated {
                moved: Some(("news".to_string(), "alert".to_string()))
            }
        );
        assert_eq!(state.projection().to_vec(), vec![Row::new(5, "alert")]);
        assert_eq!(count(&state, "news"), 0);
        assert_eq!(count(&state, "alert"), 1);
        assert_eq!(state.counts().total(), 1);
    }

    #[test]
    fn test_update_same_partition_keeps_counts() {
        let mut state = state(vec![Row::new(5, "news"), Row::new(6, "news")]);
        let mut edited = Row::new(6, "news");
        edited.created_at = Some(chrono::Utc::now());
        let applied = state.apply(&ChangeEvent::Update {
            record: edited.clone(),
            prior: None,
        });
        assert_eq!(applied, Applied::Updated { moved: None });
        assert_eq!(count(&state, "news"), 2);
        assert_eq!(state.projection().get(&6), Some(&edited));
    }

    #[test]
    fn test_filtered_view_follows_updates() {
        let mut state = state(vec![]).with_filters(vec![Filter::eq("category", json!("alert"))]);
        state.reset(vec![Row::new(1, "alert"), Row::new(2, "news")]);
        assert_eq!(state.projection().len(), 1);

        assert_eq!(
            state.apply(&ChangeEvent::Insert(Row::new(3, "news"))),
            Applied::Ignored(Ignored::FilteredOut)
        );
        assert_eq!(
            state.apply(&ChangeEvent::Update {
                record: Row::new(2, "alert"),
                prior: None
            }),
            Applied::Entered {
                partition: "alert".to_string()
            }
        );
        assert_eq!(
            state.apply(&ChangeEvent::Update {
                record: Row::new(1, "hotline"),
                prior: None
            }),
            Applied::Left {
                partition: "alert".to_string()
            }
        );
        let ids: Vec<i64> = state.projection().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(count(&state, "alert"), 1);
        assert_eq!(count(&state, "hotline"), 0);
    }

    #[test]
    fn test_snapshot_with_duplicate_ids_counts_once() {
        let state = state(vec![Row::new(1, "news"), Row::new(1, "news")]);
        assert_eq!(state.projection().len(), 1);
        assert_eq!(count(&state, "news"), 1);
    }

    #[test]
    fn test_apply_event_is_a_pure_transition() {
        let before = state(vec![Row::new(1, "news")]);
        let after = before
            .clone()
            .apply_event(&ChangeEvent::Insert(Row::new(2, "alert")))
            .apply_event(&ChangeEvent::Delete { id: 1, prior: None });

        assert_eq!(before.projection().len(), 1);
        assert_eq!(after.projection().to_vec(), vec![Row::new(2, "alert")]);
        assert_eq!(count(&after, "news"), 0);
        assert_eq!(count(&after, "alert"), 1);
    }

    #[test]
    fn test_counts_always_match_rows() {
        let mut state = state(vec![Row::new(1, "news"), Row::new(2, "alert")]);
        let events = vec![
            ChangeEvent::Insert(Row::new(3, "hotline")),
            ChangeEvent::Insert(Row::new(3, "hotline")),
            ChangeEvent::Update {
                record: Row::new(1, "alert"),
                prior: None,
            },
            ChangeEvent::Delete { id: 2, prior: None },
            ChangeEvent::Delete { id: 2, prior: None },
            ChangeEvent::Update {
                record: Row::new(9, "news"),
                prior: None,
            },
        ];
        for event in &events {
            state.apply(event);
            let recount = PartitionCounts::from_records(
                ["news", "alert", "hotline"].map(String::from),
                state.projection().iter(),
            );
            assert_eq!(state.counts(), &recount);
        }
    }
}

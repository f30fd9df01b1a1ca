//! # Projection
//! The ordered rows a screen renders. Order is display order. Where a newly seen row goes is
//! decided by the [`Placement`]; rows that are replaced keep their position.
//!
//! Rows live in an `im::Vector`, so handing a copy to a renderer or snapshotting the state for the
//! pure `apply_event` path is cheap.

use crate::data_model::Record;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Placement {
    /// New rows go on top.
    #[default]
    Prepend,
    /// New rows go at the bottom.
    Append,
    /// Keep rows sorted by `created_at`, newest first.
    NewestFirst,
    /// Keep rows sorted by `created_at`, oldest first.
    OldestFirst,
}

#[derive(Clone, Debug)]
pub struct Projection<R: Record> {
    rows: im::Vector<R>,
    placement: Placement,
}

impl<R: Record> Projection<R> {
    pub fn new(placement: Placement) -> Self {
        Self {
            rows: im::Vector::new(),
            placement,
        }
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &im::Vector<R> {
        &self.rows
    }

    pub fn to_vec(&self) -> Vec<R> {
        self.rows.iter().cloned().collect()
    }

    pub fn position(&self, id: &R::Id) -> Option<usize> {
        self.rows.iter().position(|row| &row.id() == id)
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.position(id).and_then(|index| self.rows.get(index))
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.position(id).is_some()
    }

    /// Replaces the whole row set with a snapshot, in the order the backend returned it.
    pub(crate) fn reset(&mut self, rows: impl IntoIterator<Item = R>) {
        self.rows = rows.into_iter().collect();
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }

    /// Places a row that is not in the projection yet.
    pub(crate) fn place(&mut self, record: R) {
        match self.placement {
            Placement::Prepend => self.rows.push_front(record),
            Placement::Append => self.rows.push_back(record),
            Placement::NewestFirst => {
                let created = record.created_at();
                let index = self
                    .rows
                    .iter()
                    .position(|row| row.created_at() <= created)
                    .unwrap_or(self.rows.len());
                self.rows.insert(index, record);
            }
            Placement::OldestFirst => {
                let created = record.created_at();
                let index = self
                    .rows
                    .iter()
                    .position(|row| row.created_at() > created)
                    .unwrap_or(self.rows.len());
                self.rows.insert(index, record);
            }
        }
    }

    /// Swaps in a new version of the row at `index`, returning the old one.
    pub(crate) fn replace_at(&mut self, index: usize, record: R) -> R {
        self.rows.set(index, record)
    }

    pub(crate) fn remove(&mut self, id: &R::Id) -> Option<R> {
        self.position(id).map(|index| self.rows.remove(index))
    }
}

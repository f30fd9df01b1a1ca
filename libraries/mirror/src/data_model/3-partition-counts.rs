//! # PartitionCounts
//! How many rows of the projection fall into each partition. Screens use this for tab badges and
//! stats. Partitions can be seeded so that a known set of keys always shows up, even at zero.

use std::collections::BTreeMap;

use crate::data_model::Record;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct PartitionCounts<P: Ord> {
    counts: BTreeMap<P, usize>,
}

impl<P: Ord> Default for PartitionCounts<P> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl<P: Ord + Clone> PartitionCounts<P> {
    /// Counts that list every given partition, starting at zero.
    pub fn seeded(partitions: impl IntoIterator<Item = P>) -> Self {
        Self {
            counts: partitions.into_iter().map(|p| (p, 0)).collect(),
        }
    }

    pub fn from_records<'a, R>(seed: impl IntoIterator<Item = P>, records: impl IntoIterator<Item = &'a R>) -> Self
    where
        R: Record<Partition = P>,
    {
        let mut counts = Self::seeded(seed);
        for record in records {
            counts.increment(record.partition());
        }
        counts
    }

    pub fn get(&self, partition: &P) -> usize {
        self.counts.get(partition).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, partition: P) {
        *self.counts.entry(partition).or_insert(0) += 1;
    }

    /// Never goes below zero, even if the partition was never counted.
    pub fn decrement(&mut self, partition: P) {
        let count = self.counts.entry(partition).or_insert(0);
        *count = count.saturating_sub(1);
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&P, usize)> {
        self.counts.iter().map(|(p, count)| (p, *count))
    }

    /// Resets every partition to zero, keeping the keys.
    pub(crate) fn clear(&mut self) {
        for count in self.counts.values_mut() {
            *count = 0;
        }
    }

    /// Compares against counts obtained elsewhere (an aggregate query, say). Partitions missing
    /// on either side count as zero.
    pub fn drift_from(&self, other: &Self) -> Option<CountDrift<P>> {
        let mut differences = BTreeMap::new();
        for partition in self.counts.keys().chain(other.counts.keys()) {
            let local = self.get(partition);
            let remote = other.get(partition);
            if local != remote {
                differences.insert(partition.clone(), (local, remote));
            }
        }
        if differences.is_empty() {
            None
        } else {
            Some(CountDrift { differences })
        }
    }
}

/// Partitions where local and remote counts disagree, as `(local, remote)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountDrift<P: Ord> {
    pub differences: BTreeMap<P, (usize, usize)>,
}

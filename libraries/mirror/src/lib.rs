//! This is a library for keeping a local, in-memory copy of a remote table up to date.
//! It was created for Bantay Maynila, so it only covers what the screens of that app needed.
//!
//! Syncing strategy:
//! 1. A screen mounts a projection for one table (optionally filtered, e.g. `region = 'Tondo'`).
//! 2. The projection subscribes to the table's change feed *first*, then loads a snapshot of the
//!    matching rows. Subscribing first means no change committed during the load can be missed.
//! 3. Every change event (insert/update/delete) is decoded at the boundary into a closed
//!    [`data_model::ChangeEvent`] and applied to the local rows by the reconciler, which keeps the
//!    per-partition counts in step with the rows.
//! 4. When the screen goes away the subscription is cancelled and the store is torn down, so a
//!    snapshot that is still in flight gets dropped instead of resurrecting the projection.
//!
//! The reconciler is idempotent per row id. Applying the same insert twice, or a delete for a row
//! that is already gone, leaves rows and counts unchanged. Counts are never patched on their own;
//! they only move when a row enters, leaves, or changes partition.

pub mod backend;
pub mod data_model;
pub mod feed;
pub mod loader;
pub mod memory;
pub mod sync;

pub use backend::{
    BlobStorage, ChangeFeed, DecodeError, EventKinds, FetchError, Filter, FilterOp,
    MutationBackend, MutationError, OrderBy, QueryBackend, RemovalError, Select,
    SubscriptionError, UploadError,
};
pub use feed::Subscription;
pub use sync::{ProjectionHandle, ProjectionSpec, ProjectionSync};

/// A state that can be advanced by applying events to it, one at a time.
pub trait AppState: Sized {
    type Event;

    fn apply_event(self, event: &Self::Event) -> Self;
}

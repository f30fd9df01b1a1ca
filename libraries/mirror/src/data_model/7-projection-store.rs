use std::sync::Arc;

use crate::backend::{FetchError, Filter};
use crate::data_model::{
    Applied, ChangeEvent, CountDrift, DirtyState, DirtyTracker, Ignored, ListenerKey,
    PartitionCounts, Placement, Projection, ProjectionState, Record,
};

/// The view state a single screen owns: rows, counts, the listeners that render them, and the
/// bookkeeping that keeps late snapshots from clobbering newer state.
pub struct ProjectionStore<R: Record> {
    state: DirtyTracker<ProjectionState<R>>,
    listeners: slotmap::SlotMap<slotmap::DefaultKey, Arc<dyn Fn(ListenerKey, u64)>>,

    /// Bumped by every load and filter change. A snapshot is only accepted if it was started
    /// under the current generation.
    generation: u64,
    in_flight: Option<u64>,
    /// Events applied while a snapshot was in flight. The snapshot may predate them, so they are
    /// applied again on top of it.
    replay: Vec<ChangeEvent<R>>,
    torn_down: bool,

    status: LoadStatus,
}

/// Proof that a load was started, and under which generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct LoadTicket {
    generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot replaced the rows. Holds the row count after replay.
    Applied(usize),
    /// The snapshot was superseded, or the screen went away, before it arrived.
    Stale,
    /// The backend failed. The previous rows are still there.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatus {
    /// If last_load_started > last_load_finished, a snapshot is in flight.
    pub last_load_started: Option<chrono::DateTime<chrono::Utc>>,
    pub last_load_finished: Option<chrono::DateTime<chrono::Utc>>,

    /// Set when the last snapshot failed. Cleared by the next successful one.
    pub last_load_error: Option<String>,
}

impl<R: Record> ProjectionStore<R> {
    pub fn new(placement: Placement, seed: impl IntoIterator<Item = R::Partition>) -> Self {
        Self {
            state: DirtyTracker::new(ProjectionState::new(placement, seed)),
            listeners: Default::default(),
            generation: 0,
            in_flight: None,
            replay: Vec::new(),
            torn_down: false,
            status: LoadStatus::default(),
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.state.store_mut(None).set_filters(filters);
        self
    }

    pub fn state(&self) -> &ProjectionState<R> {
        self.state.store()
    }

    pub fn projection(&self) -> &Projection<R> {
        self.state.store().projection()
    }

    pub fn counts(&self) -> &PartitionCounts<R::Partition> {
        self.state.store().counts()
    }

    pub fn filters(&self) -> &[Filter] {
        self.state.store().filters()
    }

    pub fn revision(&self) -> u64 {
        self.state.revision()
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn loaded_at_least_once(&self) -> bool {
        self.state.loaded_at_least_once()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.replay.clear();
        self.status.last_load_started = Some(chrono::Utc::now());
        LoadTicket {
            generation: self.generation,
        }
    }

    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<R>, FetchError>,
    ) -> LoadOutcome {
        if self.torn_down || ticket.generation != self.generation {
            log::debug!(
                "Dropping stale {} snapshot (generation {}, current {})",
                R::TABLE,
                ticket.generation,
                self.generation
            );
            return LoadOutcome::Stale;
        }

        self.in_flight = None;
        let replay = std::mem::take(&mut self.replay);
        self.status.last_load_finished = Some(chrono::Utc::now());

        match result {
            Ok(rows) => {
                let mut state = self.state.store_mut(None);
                state.reset(rows);
                for event in &replay {
                    state.apply(event);
                }
                let len = state.projection().len();
                drop(state);
                self.state.mark_loaded(None);
                self.status.last_load_error = None;
                log::info!(
                    "Loaded {len} {} rows ({} replayed events)",
                    R::TABLE,
                    replay.len()
                );
                LoadOutcome::Applied(len)
            }
            Err(e) => {
                log::error!("Error loading {} snapshot: {e}", R::TABLE);
                self.status.last_load_error = Some(e.to_string());
                LoadOutcome::Failed
            }
        }
    }

    /// Applies one change event. `modifier` is the listener that caused the change, if any; it
    /// will not be notified about it.
    pub fn apply(
        &mut self,
        event: &ChangeEvent<R>,
        modifier: Option<ListenerKey>,
    ) -> Applied<R::Partition> {
        if self.torn_down {
            return Applied::Ignored(Ignored::TornDown);
        }
        if self.in_flight.is_some() {
            self.replay.push(event.clone());
        }
        self.state
            .modify(modifier, |state| state.apply(event), Applied::changed)
    }

    /// Switches to a different filter. The current rows no longer describe what the screen
    /// asked for, so they are dropped and any snapshot in flight is invalidated. Start a new load
    /// afterwards.
    pub fn set_filters(&mut self, filters: Vec<Filter>) {
        self.generation += 1;
        self.in_flight = None;
        self.replay.clear();
        self.state.store_mut(None).set_filters(filters);
        self.state.mark_unloaded();
    }

    /// Marks the store as belonging to a screen that is gone. Late snapshots and events are
    /// ignored from here on, and listeners are dropped.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.in_flight = None;
        self.replay.clear();
        self.listeners.clear();
    }

    /// Compares the derived counts against an independently fetched aggregate.
    pub fn check_counts(
        &self,
        aggregate: &PartitionCounts<R::Partition>,
    ) -> Option<CountDrift<R::Partition>> {
        let drift = self.counts().drift_from(aggregate);
        if let Some(drift) = &drift {
            log::warn!(
                "{} counts drifted from the backend aggregate: {:?}",
                R::TABLE,
                drift.differences
            );
        }
        drift
    }

    /// The listener is invoked with its own key and the current revision whenever the
    /// projection changes.
    pub fn register_listener(&mut self, listener: impl Fn(ListenerKey, u64) + 'static) -> ListenerKey {
        ListenerKey(self.listeners.insert(Arc::new(listener)))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key.0);
    }

    /// Collects the callbacks that are due, resetting the store to clean. Call them after every
    /// borrow of the store has been released: a listener is free to read the store again.
    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let exclude = match self.state.take_dirty_state() {
            DirtyState::Clean => return Vec::new(),
            DirtyState::DirtyExcept(key) => Some(key),
            DirtyState::DirtyAll => None,
        };
        let revision = self.state.revision();

        let mut notifications: Vec<Box<dyn FnOnce()>> = Vec::new();
        for (key, listener) in self.listeners.iter() {
            let listener_key = ListenerKey(key);
            if exclude == Some(listener_key) {
                continue;
            }
            let listener = listener.clone();
            notifications.push(Box::new(move || listener(listener_key, revision)));
        }
        notifications
    }
}

//! # DirtyTracker
//! Wraps the projection state and remembers whether it changed since listeners were last told.
//! Every mutable access goes through [`DirtyOnDerefMut`], so a change can't slip past without
//! being noticed. The listener that caused a change can be left out of the notification, which
//! keeps a screen from re-rendering for its own optimistic edit.

use std::ops::{Deref, DerefMut};

use crate::data_model::ListenerKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyState {
    Clean,
    /// Changed by the given listener; everyone else needs to hear about it.
    DirtyExcept(ListenerKey),
    DirtyAll,
}

impl DirtyState {
    fn merge(self, modifier: Option<ListenerKey>) -> Self {
        use DirtyState::*;
        match (self, modifier) {
            (Clean, Some(key)) => DirtyExcept(key),
            (Clean, None) => DirtyAll,
            (DirtyExcept(current), Some(key)) if current == key => DirtyExcept(current),
            (DirtyExcept(_), _) | (DirtyAll, _) => DirtyAll,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DirtyTracker<Store> {
    store: Store,
    dirty_state: DirtyState,
    /// Bumped on every mutable access. Renderers can compare revisions to skip work.
    revision: u64,
    loaded_at_least_once: bool,
}

impl<Store> DirtyTracker<Store> {
    /// A freshly mounted projection is dirty: listeners should render the empty state once.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            dirty_state: DirtyState::DirtyAll,
            revision: 0,
            loaded_at_least_once: false,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn store_mut(&mut self, modifier: Option<ListenerKey>) -> DirtyOnDerefMut<'_, Store> {
        DirtyOnDerefMut {
            store: &mut self.store,
            dirty_state: &mut self.dirty_state,
            revision: &mut self.revision,
            modifier,
        }
    }

    /// Runs `f` on the store and marks it dirty only if `changed` says the result was a change.
    pub(crate) fn modify<T>(
        &mut self,
        modifier: Option<ListenerKey>,
        f: impl FnOnce(&mut Store) -> T,
        changed: impl FnOnce(&T) -> bool,
    ) -> T {
        let result = f(&mut self.store);
        if changed(&result) {
            self.store_mut(modifier).mark_dirty();
        }
        result
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty_state
    }

    /// Returns the pending state and resets it to clean.
    pub(crate) fn take_dirty_state(&mut self) -> DirtyState {
        std::mem::replace(&mut self.dirty_state, DirtyState::Clean)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn loaded_at_least_once(&self) -> bool {
        self.loaded_at_least_once
    }

    /// Returns true the first time a snapshot lands. The flag never goes back to false, except
    /// through [`DirtyTracker::mark_unloaded`] when the filter changes.
    pub(crate) fn mark_loaded(&mut self, modifier: Option<ListenerKey>) -> bool {
        if self.loaded_at_least_once {
            return false;
        }
        self.loaded_at_least_once = true;
        self.store_mut(modifier).mark_dirty();
        true
    }

    pub(crate) fn mark_unloaded(&mut self) {
        self.loaded_at_least_once = false;
    }
}

/// Mutable access to the tracked store. Only a mutable dereference marks the store dirty;
/// reading through the guard does not.
pub struct DirtyOnDerefMut<'a, Store> {
    store: &'a mut Store,
    dirty_state: &'a mut DirtyState,
    revision: &'a mut u64,
    modifier: Option<ListenerKey>,
}

impl<Store> DirtyOnDerefMut<'_, Store> {
    fn mark_dirty(&mut self) {
        *self.dirty_state = self.dirty_state.merge(self.modifier);
        *self.revision += 1;
    }
}

impl<Store> Deref for DirtyOnDerefMut<'_, Store> {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl<Store> DerefMut for DirtyOnDerefMut<'_, Store> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.mark_dirty();
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> ListenerKey {
        use slotmap::{DefaultKey, KeyData};
        ListenerKey(DefaultKey::from(KeyData::from_ffi(n)))
    }

    #[test]
    fn test_new_tracker_is_dirty() {
        let tracker = DirtyTracker::new(0u32);
        assert_eq!(tracker.dirty_state(), DirtyState::DirtyAll);
        assert!(!tracker.loaded_at_least_once());
    }

    #[test]
    fn test_reading_does_not_mark_dirty() {
        let mut tracker = DirtyTracker::new(5u32);
        tracker.take_dirty_state();
        let guard = tracker.store_mut(None);
        assert_eq!(*guard, 5);
        drop(guard);
        assert_eq!(tracker.dirty_state(), DirtyState::Clean);
        assert_eq!(tracker.revision(), 0);
    }

    #[test]
    fn test_modifier_is_excluded_until_someone_else_writes() {
        let mut tracker = DirtyTracker::new(0u32);
        tracker.take_dirty_state();

        *tracker.store_mut(Some(key(1))) += 1;
        assert_eq!(tracker.dirty_state(), DirtyState::DirtyExcept(key(1)));

        *tracker.store_mut(Some(key(1))) += 1;
        assert_eq!(tracker.dirty_state(), DirtyState::DirtyExcept(key(1)));

        *tracker.store_mut(Some(key(2))) += 1;
        assert_eq!(tracker.dirty_state(), DirtyState::DirtyAll);
        assert_eq!(tracker.revision(), 3);

        assert_eq!(tracker.take_dirty_state(), DirtyState::DirtyAll);
        assert_eq!(tracker.dirty_state(), DirtyState::Clean);
    }

    #[test]
    fn test_modify_without_change_stays_clean() {
        let mut tracker = DirtyTracker::new(vec![1, 2]);
        tracker.take_dirty_state();

        let popped = tracker.modify(None, |v| v.pop(), |_| false);
        assert_eq!(popped, Some(2));
        assert_eq!(tracker.dirty_state(), DirtyState::Clean);

        tracker.modify(Some(key(3)), |v| v.push(9), |_| true);
        assert_eq!(tracker.dirty_state(), DirtyState::DirtyExcept(key(3)));
    }

    #[test]
    fn test_mark_loaded_only_once() {
        let mut tracker = DirtyTracker::new(());
        tracker.take_dirty_state();
        assert!(tracker.mark_loaded(None));
        assert!(!tracker.mark_loaded(None));
        assert_eq!(tracker.dirty_state(), DirtyState::DirtyAll);

        tracker.mark_unloaded();
        assert!(tracker.mark_loaded(None));
    }
}

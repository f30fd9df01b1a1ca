use std::cell::{Ref, RefCell};
use std::future::Future;
use std::rc::Rc;

use crate::backend::{ChangeFeed, EventKinds, Filter, FilterOp, OrderBy, QueryBackend, Select};
use crate::data_model::{
    Applied, CountDrift, ListenerKey, LoadOutcome, PartitionCounts, Placement, ProjectionStore,
    Record,
};
use crate::feed::Subscription;
use crate::loader::{load_partition_counts, load_snapshot};
use crate::SubscriptionError;

/// What a screen wants to mirror: which rows, which change kinds, and where new rows go.
#[derive(Clone, Debug)]
pub struct ProjectionSpec<R: Record> {
    pub select: Select,
    pub kinds: EventKinds,
    pub placement: Placement,
    /// Partitions whose counts should show up as 0 before any row lands in them.
    pub seed: Vec<R::Partition>,
}

impl<R: Record> Default for ProjectionSpec<R> {
    fn default() -> Self {
        Self {
            select: Select::from(R::TABLE),
            kinds: EventKinds::All,
            placement: Placement::default(),
            seed: Vec::new(),
        }
    }
}

impl<R: Record> ProjectionSpec<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.select = self.select.filter(filter);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.select = self.select.order(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.select = self.select.limit(limit);
        self
    }

    pub fn kinds(mut self, kinds: EventKinds) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn seed(mut self, seed: impl IntoIterator<Item = R::Partition>) -> Self {
        self.seed = seed.into_iter().collect();
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.select.filters
    }

    /// Change feeds take at most one equality filter. Anything else is filtered locally.
    pub fn feed_filter(&self) -> Option<&Filter> {
        feed_filter_of(&self.select.filters)
    }
}

fn feed_filter_of(filters: &[Filter]) -> Option<&Filter> {
    filters.iter().find(|f| f.op == FilterOp::Eq)
}

/// A shared, read-mostly handle on a mounted projection. Cloning it is cheap; every clone sees
/// the same rows.
///
/// The store lives in a `RefCell`. Borrows taken through the handle must not be held across an
/// `.await`.
pub struct ProjectionHandle<R: Record> {
    store: Rc<RefCell<ProjectionStore<R>>>,
}

impl<R: Record> Clone for ProjectionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<R: Record> ProjectionHandle<R> {
    fn new(store: ProjectionStore<R>) -> Self {
        Self {
            store: Rc::new(RefCell::new(store)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, ProjectionStore<R>> {
        self.store.borrow()
    }

    /// The rows as of now. The vector is persistent, so this is a cheap copy.
    pub fn rows(&self) -> im::Vector<R> {
        self.store.borrow().projection().rows().clone()
    }

    pub fn get(&self, id: &R::Id) -> Option<R> {
        self.store.borrow().projection().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.borrow().projection().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().projection().is_empty()
    }

    pub fn counts(&self) -> PartitionCounts<R::Partition> {
        self.store.borrow().counts().clone()
    }

    pub fn revision(&self) -> u64 {
        self.store.borrow().revision()
    }

    pub fn loaded_at_least_once(&self) -> bool {
        self.store.borrow().loaded_at_least_once()
    }

    pub fn register_listener(&self, listener: impl Fn(ListenerKey, u64) + 'static) -> ListenerKey {
        let _flusher = FlushLater::new(self);
        let key = self.store.borrow_mut().register_listener(listener);
        key
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.store.borrow_mut().unregister_listener(key)
    }

    /// Applies a change that the caller already knows about, e.g. an optimistic local write.
    /// The `modifier` is not told about its own change.
    pub fn apply(
        &self,
        event: &crate::data_model::ChangeEvent<R>,
        modifier: Option<ListenerKey>,
    ) -> Applied<R::Partition> {
        let _flusher = FlushLater::new(self);
        let applied = self.store.borrow_mut().apply(event, modifier);
        applied
    }

    /// Calls every listener with pending changes. No borrow is held while they run.
    pub fn flush_notifications(&self) {
        let due = self.store.borrow_mut().drain_due_notifications();
        for notify in due {
            notify();
        }
    }
}

/// Flushes listeners when dropped, whichever way the function holding it returns.
struct FlushLater<'a, R: Record> {
    handle: &'a ProjectionHandle<R>,
}

impl<'a, R: Record> FlushLater<'a, R> {
    fn new(handle: &'a ProjectionHandle<R>) -> Self {
        Self { handle }
    }
}

impl<R: Record> Drop for FlushLater<'_, R> {
    fn drop(&mut self) {
        self.handle.flush_notifications();
    }
}

/// Keeps one projection in step with a backend table for as long as the owning screen lives.
pub struct ProjectionSync<R: Record, B> {
    backend: B,
    spec: ProjectionSpec<R>,
    handle: ProjectionHandle<R>,
    subscription: Option<Subscription>,
}

impl<R, B> ProjectionSync<R, B>
where
    R: Record,
    B: QueryBackend + ChangeFeed + Clone + 'static,
{
    /// Subscribes to the table's changes, then loads the snapshot. Changes delivered while the
    /// snapshot is in flight are applied on top of it once it lands.
    ///
    /// A failed snapshot is logged and leaves the projection empty; the subscription stays open.
    pub async fn mount(backend: B, spec: ProjectionSpec<R>) -> Result<Self, SubscriptionError> {
        let store = ProjectionStore::new(spec.placement, spec.seed.iter().cloned())
            .with_filters(spec.select.filters.clone());

        let subscription = backend
            .subscribe(R::TABLE, spec.kinds, spec.feed_filter())
            .await
            .inspect_err(|e| log::error!("Error subscribing to {}: {e}", R::TABLE))?;
        log::info!("Mounted {} projection", R::TABLE);

        let sync = Self {
            backend,
            spec,
            handle: ProjectionHandle::new(store),
            subscription: Some(subscription),
        };
        sync.reload().await;
        Ok(sync)
    }

    pub fn handle(&self) -> ProjectionHandle<R> {
        self.handle.clone()
    }

    pub fn spec(&self) -> &ProjectionSpec<R> {
        &self.spec
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Starts a fresh snapshot. The returned future does not borrow `self`; if a newer load, a
    /// filter change, or teardown happens before it resolves, its rows are thrown away.
    pub fn reload(&self) -> impl Future<Output = LoadOutcome> + use<R, B> {
        let ticket = self.handle.store.borrow_mut().begin_load();
        let backend = self.backend.clone();
        let select = self.spec.select.clone();
        let handle = self.handle.clone();
        async move {
            let result = load_snapshot::<R, B>(&backend, &select).await;
            let _flusher = FlushLater::new(&handle);
            let outcome = handle.store.borrow_mut().finish_load(ticket, result);
            outcome
        }
    }

    /// Replaces the filters, clearing the rows, and reloads under the new ones. If the filter
    /// the change feed sees is different, the new feed is opened before anything else changes.
    /// When that fails the filters, rows and old feed are all left as they were.
    pub async fn set_filter(
        &mut self,
        filters: Vec<Filter>,
    ) -> Result<LoadOutcome, SubscriptionError> {
        let feed_filter = feed_filter_of(&filters);
        if feed_filter != self.spec.feed_filter() || self.subscription.is_none() {
            let subscription = self.open_feed(feed_filter).await?;
            if let Some(old) = self.subscription.replace(subscription) {
                old.unsubscribe();
            }
        }

        self.spec.select.filters = filters.clone();
        {
            let _flusher = FlushLater::new(&self.handle);
            self.handle.store.borrow_mut().set_filters(filters);
        }
        log::info!(
            "{} projection filter changed to {:?}",
            R::TABLE,
            self.spec.select.filters
        );
        Ok(self.reload().await)
    }

    /// Waits for the next change and applies it. Payloads that fail validation are logged and
    /// skipped. Returns `None` once the feed has closed or the projection was torn down.
    pub async fn next_change(&mut self) -> Option<Applied<R::Partition>> {
        loop {
            let subscription = self.subscription.as_mut()?;
            let Some(raw) = subscription.next_change().await else {
                log::warn!("{} change feed closed", R::TABLE);
                self.subscription = None;
                return None;
            };
            if raw.table != R::TABLE {
                log::debug!("Ignoring change for {} on the {} feed", raw.table, R::TABLE);
                continue;
            }
            let event = match raw.decode::<R>() {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Skipping invalid {} change: {e}", R::TABLE);
                    continue;
                }
            };

            let _flusher = FlushLater::new(&self.handle);
            let applied = self.handle.store.borrow_mut().apply(&event, None);
            log::debug!(
                "Applied {} {} {}: {applied:?}",
                R::TABLE,
                event.kind().as_str(),
                event.id()
            );
            return Some(applied);
        }
    }

    /// Applies changes until the feed closes.
    pub async fn run(&mut self) {
        while self.next_change().await.is_some() {}
    }

    /// Reopens the change feed and reloads, for when the feed closed underneath the screen.
    /// Nothing calls this automatically.
    pub async fn resync(&mut self) -> Result<LoadOutcome, SubscriptionError> {
        self.resubscribe().await?;
        Ok(self.reload().await)
    }

    /// Opens a replacement feed first, so a failure keeps the current one.
    async fn resubscribe(&mut self) -> Result<(), SubscriptionError> {
        let subscription = self.open_feed(self.spec.feed_filter()).await?;
        if let Some(old) = self.subscription.replace(subscription) {
            old.unsubscribe();
        }
        Ok(())
    }

    async fn open_feed(&self, filter: Option<&Filter>) -> Result<Subscription, SubscriptionError> {
        self.backend
            .subscribe(R::TABLE, self.spec.kinds, filter)
            .await
            .inspect_err(|e| log::error!("Error opening the {} change feed: {e}", R::TABLE))
    }

    /// Fetches an independent per-partition count and compares it with the local one.
    pub async fn verify_counts(&self) -> Result<Option<CountDrift<R::Partition>>, crate::FetchError>
    where
        R::Partition: serde::de::DeserializeOwned,
    {
        let mut select = self.spec.select.clone();
        select.limit = None;
        let aggregate =
            load_partition_counts::<R, B>(&self.backend, &select, self.spec.seed.iter().cloned())
                .await?;
        Ok(self.handle.store.borrow().check_counts(&aggregate))
    }
}

impl<R: Record, B> ProjectionSync<R, B> {
    /// Unsubscribes and marks the projection torn down. A snapshot still in flight will be
    /// dropped when it lands.
    pub fn teardown(&mut self) {
        if self.handle.store.borrow().is_torn_down() {
            return;
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.handle.store.borrow_mut().teardown();
        log::info!("Tore down {} projection", R::TABLE);
    }
}

impl<R: Record, B> Drop for ProjectionSync<R, B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc::UnboundedReceiver;
use futures::{Stream, StreamExt};

use crate::data_model::RawChange;

/// A live subscription to one table's change feed.
///
/// Yields one [`RawChange`] per delivered mutation until the backend closes the feed or the
/// subscription is dropped. Dropping (or calling [`Subscription::unsubscribe`]) tells the backend
/// to stop, exactly once, whatever path the owner leaves through.
pub struct Subscription {
    table: String,
    events: UnboundedReceiver<RawChange>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        table: impl Into<String>,
        events: UnboundedReceiver<RawChange>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            table: table.into(),
            events,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_active(&self) -> bool {
        self.on_unsubscribe.is_some()
    }

    /// Waits for the next change. `None` means the feed is closed for good.
    pub async fn next_change(&mut self) -> Option<RawChange> {
        self.events.next().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(on_unsubscribe) = self.on_unsubscribe.take() {
            log::info!("Unsubscribing from {} changes", self.table);
            self.events.close();
            on_unsubscribe();
        }
    }
}

impl Stream for Subscription {
    type Item = RawChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("active", &self.is_active())
            .finish()
    }
}

//! Registry of event handler subscriptions.
//!
//! Every notify callback holds a [`Subscription`] and checks it before doing
//! any work. Cancelling happens before the watch handle is dropped, so no
//! handler acts on a scope that is being torn down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identifier of a registered subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SubscriptionId(u64);

/// Handle checked by an event handler before acting.
#[derive(Clone, Debug)]
pub(crate) struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Entry {
    id: SubscriptionId,
    scope: &'static str,
    active: Arc<AtomicBool>,
}

impl Entry {
    fn cancel(self) {
        self.active.store(false, Ordering::Release);
        tracing::trace!(scope = self.scope, id = self.id.0, "Handler unsubscribed");
    }
}

/// Registered subscriptions in registration order.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Subscriptions {
    /// Register a handler for `scope`.
    pub(crate) fn register(&mut self, scope: &'static str) -> (SubscriptionId, Subscription) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let active = Arc::new(AtomicBool::new(true));
        self.entries.push(Entry {
            id,
            scope,
            active: Arc::clone(&active),
        });
        (id, Subscription { active })
    }

    /// Cancel one subscription; unknown or already cancelled ids are ignored.
    pub(crate) fn cancel(&mut self, id: SubscriptionId) {
        if let Some(index) = self.entries.iter().position(|e| e.id == id) {
            self.entries.remove(index).cancel();
        }
    }

    /// Cancel everything, most recent registration first.
    ///
    /// Returns the scopes in the order they were cancelled.
    pub(crate) fn cancel_all(&mut self) -> Vec<&'static str> {
        let mut cancelled = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop() {
            cancelled.push(entry.scope);
            entry.cancel();
        }
        cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

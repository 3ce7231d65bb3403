//! In-process publish/subscribe for "resource state of user U changed".
//!
//! A publish carries either the new authoritative ledger (`Some`) or nothing
//! (`None`), which means "your cached view is stale, re-pull". Subscribers
//! register per user and are only called for that user.
//!
//! # Delivery
//!
//! [`EventBus::publish`] snapshots the subscriber list under the lock and
//! invokes callbacks after releasing it. Callbacks may therefore subscribe
//! or unsubscribe (including themselves) without deadlocking, and every
//! subscriber present when the publish began is called exactly once. No
//! ordering is guaranteed between subscribers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use hamlet_types::{ResourceLedger, UserId};
use tracing::debug;

/// Callback invoked on publish.
pub type Callback = Arc<dyn Fn(Option<&ResourceLedger>) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, (UserId, Callback)>,
}

/// Cloneable handle to a shared subscription registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("subscribers", &registry.entries.len())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for publishes about `user`.
    ///
    /// The returned guard unsubscribes when dropped.
    pub fn subscribe<F>(&self, user: UserId, callback: F) -> Subscription
    where
        F: Fn(Option<&ResourceLedger>) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id = registry.next_id.wrapping_add(1);
        registry.entries.insert(id, (user, Arc::new(callback)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Announce a change for `user`. Returns how many subscribers were called.
    pub fn publish(&self, user: UserId, payload: Option<&ResourceLedger>) -> usize {
        let targets: Vec<Callback> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .entries
                .values()
                .filter(|(owner, _)| *owner == user)
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };
        for callback in &targets {
            callback(payload);
        }
        debug!(
            user_id = %user,
            invalidate = payload.is_none(),
            delivered = targets.len(),
            "bus publish"
        );
        targets.len()
    }

    /// Number of live subscriptions for `user`.
    pub fn subscriber_count(&self, user: UserId) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .entries
            .values()
            .filter(|(owner, _)| *owner == user)
            .count()
    }
}

/// Guard for one registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Subscription {
    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.entries.remove(&self.id);
        }
    }
}

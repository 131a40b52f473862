//! Typed event buses with explicit subscribe/unsubscribe.
//!
//! Each component owns one [`EventBus`] per event kind. Buses are cheap to
//! clone and all clones share the same subscriber table, so a handle can be
//! taken before the owning component moves onto its worker thread.

use crossbeam_channel::{unbounded, Receiver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Subscription ID for deregistration
pub type SubscriptionId = u64;

/// Callback function type
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    callbacks: HashMap<SubscriptionId, Callback<E>>,
    next_id: SubscriptionId,
}

pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                callbacks: HashMap::new(),
                next_id: 0,
            })),
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback for this event kind
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Deregister a callback, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry().callbacks.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().callbacks.len()
    }

    /// Deliver `event` to every subscriber.
    ///
    /// The subscriber table is snapshotted first, so callbacks may subscribe
    /// or unsubscribe without deadlocking.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self.registry().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Subscribe with an unbounded channel instead of a callback.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<E>) {
        let (sender, receiver) = unbounded();
        let id = self.subscribe(move |event: &E| {
            let _ = sender.send(event.clone());
        });
        (id, receiver)
    }
}

//! Typed subscription lists, one per event kind.
//!
//! Subscribers are held in a token -> callback map and invoked synchronously
//! within the queue call that caused the change; unsubscribing by token is
//! what prevents listener leaks.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use uuid::Uuid;

use crate::queue::record::TaskId;

pub type SubscriptionId = Uuid;

/// A non-terminal progress report for a still-executing task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub message: String,
    pub partial_result: Option<serde_json::Value>,
}

/// Subscriber registry for one event kind.
///
/// Callbacks run while the registry lock is held and must not call back
/// into the registry or the queue that owns it.
pub(crate) struct Listeners<E> {
    inner: Mutex<HashMap<SubscriptionId, Box<dyn Fn(&E) + Send + Sync>>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.inner
            .lock()
            .expect("listener map poisoned")
            .insert(id, Box::new(callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner
            .lock()
            .expect("listener map poisoned")
            .remove(&id)
            .is_some()
    }

    pub fn emit(&self, event: &E) {
        let listeners = self.inner.lock().expect("listener map poisoned");
        for callback in listeners.values() {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn emit_reaches_every_subscriber_synchronously() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            listeners.subscribe(move |v| {
                seen.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        listeners.emit(&5);
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn unsubscribe_by_token_stops_delivery() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let token = {
            let seen = Arc::clone(&seen);
            listeners.subscribe(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        listeners.emit(&0);
        assert!(listeners.unsubscribe(token));
        listeners.emit(&0);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        // Token is gone; a second unsubscribe is a no-op.
        assert!(!listeners.unsubscribe(token));
    }
}

use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The host's real emitter.
pub trait EventSink: Send + Sync {
    fn emit_without_lock(&self, event: &str, payload: &Value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub name: String,
    pub payload: Value,
}

/// Fans events out to any number of subscribers.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit_without_lock(&self, event: &str, payload: &Value) {
        // No subscribers is not an error
        let _ = self.sender.send(ChangeEvent {
            name: event.to_string(),
            payload: payload.clone(),
        });
    }
}

#[derive(Default)]
struct LockState {
    count: usize,
    /// Buffered events in first-buffered order; one entry per name.
    pending: Vec<(String, Value)>,
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Identifies a registered cleanup so its owner can withdraw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(u64);

#[derive(Default)]
struct Cleanups {
    next_id: u64,
    registered: Vec<(CleanupId, Cleanup)>,
}

/// Reference-counted lock in front of an `EventSink`.
///
/// While locked, emissions are buffered by name, a later payload replacing an
/// earlier one. When the count returns to zero the buffer is flushed in the
/// order names were first buffered, then cleared.
pub struct ChangeBus {
    sink: Arc<dyn EventSink>,
    state: Mutex<LockState>,
    cleanups: Mutex<Cleanups>,
}

impl ChangeBus {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        ChangeBus {
            sink,
            state: Mutex::new(LockState::default()),
            cleanups: Mutex::new(Cleanups::default()),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().count > 0
    }

    pub fn lock(&self) {
        self.state.lock().count += 1;
    }

    /// Decrement the lock count, never below zero, flushing at zero.
    pub fn unlock(&self) {
        let flushed = {
            let mut state = self.state.lock();
            state.count = state.count.saturating_sub(1);
            if state.count > 0 {
                return;
            }
            std::mem::take(&mut state.pending)
        };

        // Sink runs outside the state lock so it may emit again
        for (event, payload) in flushed {
            self.sink.emit_without_lock(&event, &payload);
        }
    }

    pub fn emit(&self, event: &str, payload: Value) {
        {
            let mut state = self.state.lock();
            if state.count > 0 {
                match state.pending.iter_mut().find(|(name, _)| name == event) {
                    Some((_, pending)) => *pending = payload,
                    None => state.pending.push((event.to_string(), payload)),
                }
                return;
            }
        }
        self.sink.emit_without_lock(event, &payload);
    }

    /// Lock until the returned guard is dropped.
    pub fn lock_guard(&self) -> BusLock<'_> {
        self.lock();
        BusLock { bus: self }
    }

    /// Run `fut` with the bus locked. The lock is released even if `fut` fails.
    pub async fn with_lock<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock_guard();
        fut.await
    }

    /// Register a callback to run on `teardown`.
    pub fn register(&self, cleanup: impl FnOnce() + Send + 'static) -> CleanupId {
        let mut cleanups = self.cleanups.lock();
        let id = CleanupId(cleanups.next_id);
        cleanups.next_id += 1;
        cleanups.registered.push((id, Box::new(cleanup)));
        id
    }

    /// Withdraw a cleanup without running it. Returns false if it already ran.
    pub fn unregister(&self, id: CleanupId) -> bool {
        let mut cleanups = self.cleanups.lock();
        let before = cleanups.registered.len();
        cleanups.registered.retain(|(registered, _)| *registered != id);
        cleanups.registered.len() != before
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.lock().registered.len()
    }

    /// Run every registered cleanup once, most recent first.
    pub fn teardown(&self) {
        let cleanups = std::mem::take(&mut self.cleanups.lock().registered);
        for (_, cleanup) in cleanups.into_iter().rev() {
            cleanup();
        }
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChangeBus")
            .field("lock_count", &state.count)
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// RAII guard returned by `ChangeBus::lock_guard`.
pub struct BusLock<'a> {
    bus: &'a ChangeBus,
}

impl Drop for BusLock<'_> {
    fn drop(&mut self) {
        self.bus.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bus() -> (ChangeBus, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (ChangeBus::new(sink.clone()), sink)
    }

    #[test]
    fn test_emit_passes_through_when_unlocked() {
        let (bus, sink) = bus();
        bus.emit("changed", json!(1));
        assert_eq!(sink.events(), vec![("changed".to_string(), json!(1))]);
    }

    #[test]
    fn test_lock_coalesces_same_event() {
        let (bus, sink) = bus();
        bus.lock();
        bus.emit("changed", json!("A"));
        bus.emit("changed", json!("B"));
        assert!(sink.events().is_empty());

        bus.unlock();
        assert_eq!(sink.events(), vec![("changed".to_string(), json!("B"))]);
    }

    #[test]
    fn test_flush_keeps_first_buffered_order() {
        let (bus, sink) = bus();
        bus.lock();
        bus.emit("first", json!(1));
        bus.emit("second", json!(2));
        bus.emit("first", json!(3));
        bus.unlock();

        assert_eq!(
            sink.events(),
            vec![
                ("first".to_string(), json!(3)),
                ("second".to_string(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_nested_locks_flush_on_outermost_unlock() {
        let (bus, sink) = bus();
        bus.lock();
        bus.lock();
        bus.emit("changed", json!(1));
        bus.unlock();
        assert!(sink.events().is_empty());
        assert!(bus.is_locked());

        bus.unlock();
        assert_eq!(sink.count("changed"), 1);
    }

    #[test]
    fn test_pending_is_cleared_after_flush() {
        let (bus, sink) = bus();
        bus.lock();
        bus.emit("changed", json!(1));
        bus.unlock();

        // A second empty lock cycle must not replay the first event
        bus.lock();
        bus.unlock();
        assert_eq!(sink.count("changed"), 1);
    }

    #[test]
    fn test_unlock_saturates_at_zero() {
        let (bus, sink) = bus();
        bus.unlock();
        bus.unlock();
        bus.lock();
        bus.emit("changed", json!(1));
        assert!(sink.events().is_empty());
        bus.unlock();
        assert_eq!(sink.count("changed"), 1);
    }

    #[tokio::test]
    async fn test_with_lock_unlocks_on_error() {
        let (bus, sink) = bus();
        let result: Result<(), &str> = bus
            .with_lock(async {
                bus.emit("changed", json!(1));
                Err("boom")
            })
            .await;

        assert!(result.is_err());
        assert!(!bus.is_locked());
        assert_eq!(sink.count("changed"), 1);
    }

    #[test]
    fn test_teardown_runs_cleanups_once() {
        let (bus, _sink) = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            bus.register(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.teardown();
        bus.teardown();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_withdraws_cleanup() {
        let (bus, _sink) = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = {
            let calls = calls.clone();
            bus.register(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(bus.cleanup_count(), 1);

        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));
        assert_eq!(bus.cleanup_count(), 0);

        bus.teardown();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = Arc::new(BroadcastSink::new(8));
        let mut rx = sink.subscribe();
        let bus = ChangeBus::new(sink.clone());

        bus.emit("datatables:index:changed", json!({ "revision": 1 }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "datatables:index:changed");
        assert_eq!(event.payload["revision"], 1);
    }
}

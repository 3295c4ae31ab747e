//! In-process fan-out notification bus
//!
//! Producers publish change events; every registered sink receives each
//! event once, in registration order. A failing sink is logged and skipped
//! so one bad consumer cannot starve the rest, and sinks may register or
//! unregister at any time, including from inside their own delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

use crate::types::error::Result;

/// Handle identifying one registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Boxed sink callback invoked once per published event
pub type Sink<E> = Box<dyn FnMut(&E) -> Result<()> + Send>;

struct SinkEntry<E> {
    id: SinkId,
    sink: Arc<Mutex<Sink<E>>>,
}

impl<E> Clone for SinkEntry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sink: Arc::clone(&self.sink),
        }
    }
}

struct BusInner<E> {
    next_id: AtomicU64,
    sinks: Mutex<Vec<SinkEntry<E>>>,
}

/// Multicast channel delivering each event to all current subscribers
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Vec<SinkEntry<E>>> {
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a sink; it will receive every event published after this
    /// call. Returns the id needed to unregister it later.
    pub fn subscribe(&self, sink: Sink<E>) -> SinkId {
        let id = SinkId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry().push(SinkEntry {
            id,
            sink: Arc::new(Mutex::new(sink)),
        });
        id
    }

    /// Remove a sink. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SinkId) -> bool {
        let mut sinks = self.registry();
        let before = sinks.len();
        sinks.retain(|entry| entry.id != id);
        sinks.len() != before
    }

    /// Deliver `event` once to every sink registered at the time of the
    /// call, in registration order.
    ///
    /// The registry lock is not held while a sink runs, so sinks are free
    /// to subscribe, unsubscribe, or publish further events. A sink that
    /// unregisters mid-delivery is skipped; a sink registered mid-delivery
    /// does not see the in-flight event. Sink errors are logged and do not
    /// stop delivery to the remaining sinks.
    pub fn publish(&self, event: &E) {
        let entries: Vec<SinkEntry<E>> = self.registry().clone();
        for entry in entries {
            let still_registered = self.registry().iter().any(|e| e.id == entry.id);
            if !still_registered {
                continue;
            }
            let mut sink = entry.sink.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = (sink)(event) {
                warn!(sink = entry.id.0, error = %err, "event sink failed, skipping");
            }
        }
    }

    /// Number of currently registered sinks
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::error::BridgeError;
    use std::sync::Mutex as StdMutex;

    fn recording_sink(log: Arc<StdMutex<Vec<String>>>, tag: &str) -> Sink<String> {
        let tag = tag.to_string();
        Box::new(move |event: &String| {
            log.lock().unwrap().push(format!("{tag}:{event}"));
            Ok(())
        })
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::<String>::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(recording_sink(log.clone(), "a"));
        bus.subscribe(recording_sink(log.clone(), "b"));
        bus.subscribe(recording_sink(log.clone(), "c"));

        bus.publish(&"x".to_string());

        assert_eq!(*log.lock().unwrap(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn test_failing_sink_does_not_stop_delivery() {
        let bus = EventBus::<String>::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(recording_sink(log.clone(), "first"));
        bus.subscribe(Box::new(|_: &String| {
            Err(BridgeError::Other("sink exploded".into()))
        }));
        bus.subscribe(recording_sink(log.clone(), "last"));

        bus.publish(&"x".to_string());

        assert_eq!(*log.lock().unwrap(), vec!["first:x", "last:x"]);
    }

    #[test]
    fn test_unsubscribe_mid_delivery_skips_later_sink() {
        let bus = EventBus::<String>::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let victim_id = Arc::new(StdMutex::new(None::<SinkId>));

        let bus_handle = bus.clone();
        let victim_handle = victim_id.clone();
        bus.subscribe(Box::new(move |_: &String| {
            if let Some(id) = victim_handle.lock().unwrap().take() {
                assert!(bus_handle.unsubscribe(id));
            }
            Ok(())
        }));
        let id = bus.subscribe(recording_sink(log.clone(), "victim"));
        *victim_id.lock().unwrap() = Some(id);

        bus.publish(&"x".to_string());

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_sink_registered_mid_delivery_misses_current_event() {
        let bus = EventBus::<String>::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let bus_handle = bus.clone();
        let log_handle = log.clone();
        bus.subscribe(Box::new(move |_: &String| {
            let inner_log = log_handle.clone();
            bus_handle.subscribe(Box::new(move |event: &String| {
                inner_log.lock().unwrap().push(format!("late:{event}"));
                Ok(())
            }));
            Ok(())
        }));

        bus.publish(&"first".to_string());
        assert!(log.lock().unwrap().is_empty());

        bus.publish(&"second".to_string());
        let seen = log.lock().unwrap();
        assert!(seen.iter().all(|line| line.ends_with(":second")));
        assert!(!seen.is_empty());
    }

    #[test]
    fn test_unsubscribe_unknown_id() {
        let bus = EventBus::<u32>::new();
        let id = bus.subscribe(Box::new(|_| Ok(())));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
    }
}

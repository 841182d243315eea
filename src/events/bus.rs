//! # Event bus for decoupled, in-process notifications.
//!
//! [`EventBus`] is a multi-subscriber publish/subscribe channel keyed by event name.
//! Unlike a broadcast queue it delivers synchronously: `emit` runs every listener before
//! returning and reports how many succeeded.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                         Listeners (per event name):
//!   controller A ──┐                          ┌──► listener 1
//!   controller B ──┼── emit("job:done", p) ──►├──► listener 2 (once)
//!   poll callback ─┘         │                └──► listener N
//!                            ▼
//!                      History (ring buffer, diagnostics only)
//! ```
//!
//! ## Rules
//! - **Snapshot per emission**: (un)subscribing during `emit` affects the next emission only.
//! - **Isolation**: listener errors/panics are logged and excluded from the returned count.
//! - **Deduplication**: the same [`Listener`] registered twice on one event is stored once;
//!   the second [`Subscription`] is inert.
//! - **No retention**: an event whose last listener leaves is forgotten entirely.
//! - **History**: every emission is recorded, even with zero listeners.
//!
//! ## Example
//! ```rust
//! use appcore::{EventBus, Listener};
//! use serde_json::json;
//!
//! let bus = EventBus::new(100);
//! let sub = bus.on("job:done", Listener::new(|p: &serde_json::Value| {
//!     println!("done: {p}");
//!     Ok(())
//! })).unwrap();
//!
//! assert_eq!(bus.emit("job:done", json!({"id": "j1"})), 1);
//! sub.unsubscribe();
//! assert_eq!(bus.emit("job:done", json!({"id": "j2"})), 0);
//! assert_eq!(bus.history().len(), 2);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::EventError;
use crate::events::history::History;
use crate::listeners::{dispatch, dispatch_async, validate_channel, Listener, ListenerSet, Subscription};

/// One emission as recorded in the bus history.
#[derive(Debug)]
pub struct EmitRecord<T> {
    /// Event name.
    pub event: String,
    /// Payload passed to listeners.
    pub payload: Arc<T>,
    /// Listeners in the snapshot at emission time.
    pub listener_count: usize,
    /// Wall-clock timestamp.
    pub at: DateTime<Utc>,
}

impl<T> Clone for EmitRecord<T> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            payload: Arc::clone(&self.payload),
            listener_count: self.listener_count,
            at: self.at,
        }
    }
}

struct Inner<T> {
    channels: Mutex<IndexMap<String, ListenerSet<T>>>,
    history: Mutex<History<EmitRecord<T>>>,
}

/// Named-event publish/subscribe channel.
///
/// Cheap to clone; clones share listeners and history.
pub struct EventBus<T = serde_json::Value> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(100)
    }
}

impl<T: Send + Sync + 'static> EventBus<T> {
    /// Creates a bus keeping the last `history_capacity` emissions (min 1).
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(IndexMap::new()),
                history: Mutex::new(History::new(history_capacity)),
            }),
        }
    }

    /// Subscribes `listener` to `event`.
    ///
    /// Returns a [`Subscription`] that removes this listener again.
    /// Fails with [`EventError::InvalidEventName`] for empty names.
    pub fn on(&self, event: &str, listener: Listener<T>) -> Result<Subscription, EventError> {
        self.subscribe(event, listener, false)
    }

    /// Subscribes `listener` for the next emission of `event` only.
    pub fn once(&self, event: &str, listener: Listener<T>) -> Result<Subscription, EventError> {
        self.subscribe(event, listener, true)
    }

    /// Removes `listener` from `event`. Returns `false` if it was not subscribed.
    pub fn off(&self, event: &str, listener: &Listener<T>) -> bool {
        let mut channels = self.channels();
        let Some(set) = channels.get_mut(event) else {
            return false;
        };
        let removed = set.remove(listener);
        if set.is_empty() {
            channels.shift_remove(event);
        }
        removed
    }

    /// Emits `payload` to every listener of `event` and returns how many succeeded.
    pub fn emit(&self, event: &str, payload: T) -> usize {
        let payload = Arc::new(payload);
        let snapshot = self.snapshot(event);
        self.record(event, &payload, snapshot.len());
        dispatch(event, &snapshot, &payload)
    }

    /// Emits `payload`, awaiting every listener in subscription order.
    pub async fn emit_async(&self, event: &str, payload: T) -> usize {
        let payload = Arc::new(payload);
        let snapshot = self.snapshot(event);
        self.record(event, &payload, snapshot.len());
        dispatch_async(event, &snapshot, &payload).await
    }

    /// Removes the listeners of one event, or of every event when `event` is `None`.
    pub fn clear(&self, event: Option<&str>) {
        let mut channels = self.channels();
        match event {
            Some(name) => {
                channels.shift_remove(name);
            }
            None => channels.clear(),
        }
    }

    /// Number of listeners currently subscribed to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.channels().get(event).map_or(0, ListenerSet::len)
    }

    /// Names of events that have at least one listener, in first-subscription order.
    pub fn event_names(&self) -> Vec<String> {
        self.channels().keys().cloned().collect()
    }

    /// Recorded emissions, oldest first.
    pub fn history(&self) -> Vec<EmitRecord<T>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    /// Drops all recorded emissions.
    pub fn clear_history(&self) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn subscribe(
        &self,
        event: &str,
        listener: Listener<T>,
        once: bool,
    ) -> Result<Subscription, EventError> {
        validate_channel(event)?;
        let id = self
            .channels()
            .entry(event.to_string())
            .or_default()
            .insert(listener, once);
        let Some(id) = id else {
            return Ok(Subscription::inert());
        };

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let event = event.to_string();
        Ok(Subscription::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut channels = inner.channels.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(set) = channels.get_mut(&event) {
                set.remove_id(id);
                if set.is_empty() {
                    channels.shift_remove(&event);
                }
            }
        }))
    }

    /// Takes the listener snapshot for one emission; forgets the event if only one-shots remained.
    fn snapshot(&self, event: &str) -> Vec<Listener<T>> {
        let mut channels = self.channels();
        let Some(set) = channels.get_mut(event) else {
            return Vec::new();
        };
        let snapshot = set.take_snapshot();
        if set.is_empty() {
            channels.shift_remove(event);
        }
        snapshot
    }

    fn record(&self, event: &str, payload: &Arc<T>, listener_count: usize) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EmitRecord {
                event: event.to_string(),
                payload: Arc::clone(payload),
                listener_count,
                at: Utc::now(),
            });
    }

    fn channels(&self) -> MutexGuard<'_, IndexMap<String, ListenerSet<T>>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(hits: &Arc<AtomicUsize>) -> Listener<u32> {
        let hits = Arc::clone(hits);
        Listener::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn emit_without_listeners_still_records_history() {
        let bus: EventBus<u32> = EventBus::new(100);
        assert_eq!(bus.emit("nobody", 1), 0);
        let history = bus.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event, "nobody");
        assert_eq!(history[0].listener_count, 0);
    }

    #[test]
    fn rejects_blank_event_names() {
        let bus: EventBus<u32> = EventBus::new(10);
        let err = bus.on("", Listener::new(|_| Ok(()))).unwrap_err();
        assert_eq!(err.as_label(), "event_invalid_name");
    }

    #[test]
    fn failing_listener_does_not_stop_later_ones() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on("e", Listener::new(|_| Err(anyhow::anyhow!("l1 failed"))))
            .unwrap();
        bus.on("e", counter(&hits)).unwrap();
        bus.on("e", counter(&hits)).unwrap();

        assert_eq!(bus.emit("e", 0), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn same_listener_twice_fires_once() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let l = counter(&hits);
        bus.on("e", l.clone()).unwrap();
        bus.on("e", l.clone()).unwrap();

        assert_eq!(bus.listener_count("e"), 1);
        assert_eq!(bus.emit("e", 0), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_subscription_handle_is_inert() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let l = counter(&hits);
        let owner = bus.on("e", l.clone()).unwrap();
        let duplicate = bus.on("e", l.clone()).unwrap();

        duplicate.unsubscribe();
        assert_eq!(bus.listener_count("e"), 1);
        owner.unsubscribe();
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn once_fires_a_single_time_and_forgets_event() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        bus.once("e", counter(&hits)).unwrap();

        assert_eq!(bus.emit("e", 0), 1);
        assert_eq!(bus.emit("e", 0), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn reentrant_emit_cannot_retrigger_once() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_bus = bus.clone();
        let counted = Arc::clone(&hits);
        bus.once(
            "e",
            Listener::new(move |depth: &u32| {
                counted.fetch_add(1, Ordering::SeqCst);
                if *depth == 0 {
                    inner_bus.emit("e", 1);
                }
                Ok(())
            }),
        )
        .unwrap();

        bus.emit("e", 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribing_during_emit_waits_for_next_cycle() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let late = counter(&hits);
        let bus2 = bus.clone();
        bus.on(
            "e",
            Listener::new(move |_| {
                bus2.on("e", late.clone())?;
                Ok(())
            }),
        )
        .unwrap();

        assert_eq!(bus.emit("e", 0), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.emit("e", 0), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_empty_event_keys() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let l = counter(&hits);
        bus.on("a", l.clone()).unwrap();
        bus.on("b", Listener::new(|_| Ok(()))).unwrap();
        assert_eq!(bus.event_names(), vec!["a".to_string(), "b".to_string()]);

        assert!(bus.off("a", &l));
        assert!(!bus.off("a", &l));
        assert_eq!(bus.event_names(), vec!["b".to_string()]);

        bus.clear(None);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus: EventBus<u32> = EventBus::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = bus.on("e", counter(&hits)).unwrap();
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(bus.emit("e", 0), 0);
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn history_is_bounded() {
        let bus: EventBus<u32> = EventBus::new(3);
        for i in 0..5 {
            bus.emit("tick", i);
        }
        let seen: Vec<u32> = bus.history().iter().map(|r| *r.payload).collect();
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn emit_async_awaits_in_order() {
        let bus: EventBus<u32> = EventBus::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, wait) in [("a", 30u64), ("b", 0)] {
            let order = Arc::clone(&order);
            bus.on(
                "e",
                Listener::from_async(move |_: Arc<u32>| {
                    let order = Arc::clone(&order);
                    async move {
                        tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                        order.lock().unwrap().push(tag);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }
        bus.on("e", Listener::new(|_| Err(anyhow::anyhow!("nope"))))
            .unwrap();

        assert_eq!(bus.emit_async("e", 0).await, 2);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }
}

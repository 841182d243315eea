//! # Reactive state store.
//!
//! [`StateStore`] owns the application's [`AppState`] tree and is the only place it is
//! mutated. Reads go through [`get`](StateStore::get) or typed accessors; writes go
//! through [`set`](StateStore::set) or the entity lifecycle methods, which publish
//! [`StoreEvent`]s once the mutation is committed.
//!
//! ## Architecture
//! ```text
//! set("jobs.j1.status", v)
//!     │
//!     ├─► serialize tree ─► compare old/new ─► (equal) return false
//!     │
//!     ├─► assign + deserialize into AppState (typed validation)
//!     │
//!     └─► commit ──► history
//!                ├─► listeners of "jobs.j1.status"   (Changed { value, old_value })
//!                └─► listeners of "change"           (same payload)
//! ```
//!
//! ## Rules
//! - No lock is held while listeners run; a listener may read or write the store.
//! - Path listeners fire before `"change"` listeners.
//! - `spinner.is_active` and `countdown.is_active` are derived and cannot be forced by `set`.
//! - Listener failures are isolated exactly as on the [`EventBus`](crate::EventBus).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::Config;
use crate::error::{EventError, StateError};
use crate::events::History;
use crate::listeners::{
    dispatch, panic_message, validate_channel, Listener, ListenerSet, Subscription,
};
use crate::state::event::{channels, StoreEvent};
use crate::state::model::AppState;
use crate::state::path;

/// Cancel hook attached to a job or cohort, typically stopping its poll loop.
pub type PollStop = Arc<dyn Fn() + Send + Sync>;

/// One entry of the store history.
#[derive(Debug, Clone)]
pub struct StateRecord {
    /// Path for `Changed`, channel name otherwise.
    pub channel: String,
    pub event: Arc<StoreEvent>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreSettings {
    pub history_capacity: usize,
    pub countdown_initial: u32,
    pub countdown_tick: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            countdown_initial: 20,
            countdown_tick: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
pub(crate) struct PollStops {
    pub jobs: IndexMap<String, PollStop>,
    pub cohorts: IndexMap<String, PollStop>,
}

pub(crate) struct Inner {
    pub(crate) state: Mutex<AppState>,
    channels: Mutex<IndexMap<String, ListenerSet<StoreEvent>>>,
    history: Mutex<History<StateRecord>>,
    pub(crate) stops: Mutex<PollStops>,
    pub(crate) countdown: Mutex<Option<CancellationToken>>,
    pub(crate) monitors: Mutex<IndexMap<String, CancellationToken>>,
    pub(crate) settings: StoreSettings,
}

/// Single source of truth for application state.
///
/// Cheap to clone; clones share the tree, listeners and timers.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::with_settings(StoreSettings::default())
    }
}

impl StateStore {
    /// Creates a store keeping the last `history_capacity` records (min 1).
    pub fn new(history_capacity: usize) -> Self {
        Self::with_settings(StoreSettings {
            history_capacity,
            ..StoreSettings::default()
        })
    }

    /// Creates a store using the history and countdown settings of `cfg`.
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_settings(StoreSettings {
            history_capacity: cfg.state_history_capacity,
            countdown_initial: cfg.countdown_initial,
            countdown_tick: cfg.countdown_tick,
        })
    }

    pub(crate) fn with_settings(settings: StoreSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(AppState::default()),
                channels: Mutex::new(IndexMap::new()),
                history: Mutex::new(History::new(settings.history_capacity)),
                stops: Mutex::new(PollStops::default()),
                countdown: Mutex::new(None),
                monitors: Mutex::new(IndexMap::new()),
                settings,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Reads the value at a dot path. Unknown or malformed paths read as `None`.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = path::parse(path).ok()?;
        let tree = to_json(&*self.state());
        path::lookup(&tree, &segments).cloned()
    }

    /// Writes `value` at a dot path.
    ///
    /// Returns `Ok(false)` without notifying anyone when the value is unchanged.
    ///
    /// # Errors
    /// - [`StateError::InvalidPath`] for empty segments or an unknown top-level region;
    /// - [`StateError::InvalidValue`] when the result does not fit the typed tree.
    pub fn set(&self, path: &str, value: Value) -> Result<bool, StateError> {
        let segments = path::parse(path)?;
        let ticking = self.countdown_token().is_some();

        let (stored, old_value) = {
            let mut state = self.state();
            let mut tree = serde_json::to_value(&*state).map_err(|e| invalid(path, e))?;
            let old_value = path::lookup(&tree, &segments).cloned();
            if old_value.as_ref() == Some(&value) {
                return Ok(false);
            }
            path::assign(&mut tree, &segments, value.clone(), path)?;

            let mut next: AppState = serde_json::from_value(tree).map_err(|e| invalid(path, e))?;
            next.spinner.is_active = next.spinner.count > 0;
            next.countdown.is_active = ticking;

            // Normalization may undo the write.
            let stored = path::lookup(&to_json(&next), &segments).cloned();
            if stored == old_value {
                return Ok(false);
            }
            *state = next;
            (stored.unwrap_or(Value::Null), old_value)
        };

        self.commit(path.to_string(), stored, old_value);
        Ok(true)
    }

    /// Typed clone of the whole tree.
    pub fn snapshot(&self) -> AppState {
        self.state().clone()
    }

    /// Subscribes `listener` to a channel or an exact dot path.
    pub fn on(
        &self,
        channel: &str,
        listener: Listener<StoreEvent>,
    ) -> Result<Subscription, EventError> {
        self.subscribe(channel, listener, false)
    }

    /// Subscribes `listener` for the next event on `channel` only.
    pub fn once(
        &self,
        channel: &str,
        listener: Listener<StoreEvent>,
    ) -> Result<Subscription, EventError> {
        self.subscribe(channel, listener, true)
    }

    /// Removes `listener` from `channel`. Returns `false` if it was not subscribed.
    pub fn off(&self, channel: &str, listener: &Listener<StoreEvent>) -> bool {
        let mut map = self.channels();
        let Some(set) = map.get_mut(channel) else {
            return false;
        };
        let removed = set.remove(listener);
        if set.is_empty() {
            map.shift_remove(channel);
        }
        removed
    }

    /// Publishes `event` on `channel` and returns how many listeners succeeded.
    pub fn emit(&self, channel: &str, event: StoreEvent) -> usize {
        self.publish(channel, event)
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels().get(channel).map_or(0, ListenerSet::len)
    }

    /// Recorded mutations and events, oldest first.
    pub fn history(&self) -> Vec<StateRecord> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn clear_history(&self) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Tears down every background activity owned by the store.
    ///
    /// Clears the countdown, cancels job monitors, invokes and forgets every job and
    /// cohort poll-stop hook, then publishes [`StoreEvent::Cleanup`]. Safe to call twice.
    pub fn cleanup(&self) {
        self.clear_countdown();
        self.stop_job_monitor();

        let hooks: Vec<(String, PollStop)> = {
            let mut stops = self.inner.stops.lock().unwrap_or_else(PoisonError::into_inner);
            let jobs = std::mem::take(&mut stops.jobs);
            let cohorts = std::mem::take(&mut stops.cohorts);
            jobs.into_iter().chain(cohorts).collect()
        };
        for (id, stop) in hooks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| stop())) {
                warn!(id = %id, info = %panic_message(&panic), "poll stop hook panicked");
            }
        }

        self.publish(channels::CLEANUP, StoreEvent::Cleanup);
    }

    /// Records and delivers a path change: path listeners first, then `"change"`.
    pub(crate) fn commit(&self, path: String, value: Value, old_value: Option<Value>) {
        let event = Arc::new(StoreEvent::Changed {
            path: path.clone(),
            value,
            old_value,
        });
        self.record(&path, &event);
        self.deliver(&path, &event);
        self.deliver(channels::CHANGE, &event);
    }

    /// Records and delivers a lifecycle event on `channel`.
    pub(crate) fn publish(&self, channel: &str, event: StoreEvent) -> usize {
        let event = Arc::new(event);
        self.record(channel, &event);
        self.deliver(channel, &event)
    }

    fn deliver(&self, channel: &str, event: &Arc<StoreEvent>) -> usize {
        let snapshot = {
            let mut map = self.channels();
            let Some(set) = map.get_mut(channel) else {
                return 0;
            };
            let snapshot = set.take_snapshot();
            if set.is_empty() {
                map.shift_remove(channel);
            }
            snapshot
        };
        dispatch(channel, &snapshot, event)
    }

    fn record(&self, channel: &str, event: &Arc<StoreEvent>) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StateRecord {
                channel: channel.to_string(),
                event: Arc::clone(event),
                at: Utc::now(),
            });
    }

    fn subscribe(
        &self,
        channel: &str,
        listener: Listener<StoreEvent>,
        once: bool,
    ) -> Result<Subscription, EventError> {
        validate_channel(channel)?;
        let id = self
            .channels()
            .entry(channel.to_string())
            .or_default()
            .insert(listener, once);
        let Some(id) = id else {
            return Ok(Subscription::inert());
        };

        let weak = self.downgrade();
        let channel = channel.to_string();
        Ok(Subscription::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut map = inner.channels.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(set) = map.get_mut(&channel) {
                set.remove_id(id);
                if set.is_empty() {
                    map.shift_remove(&channel);
                }
            }
        }))
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, AppState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn countdown_token(&self) -> Option<CancellationToken> {
        self.inner
            .countdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn channels(&self) -> MutexGuard<'_, IndexMap<String, ListenerSet<StoreEvent>>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes a tree fragment for notifications.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn invalid(path: &str, err: serde_json::Error) -> StateError {
    StateError::InvalidValue {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(store: &StateStore, channel: &str) -> Arc<Mutex<Vec<StoreEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .on(
                channel,
                Listener::new(move |e: &StoreEvent| {
                    sink.lock().unwrap().push(e.clone());
                    Ok(())
                }),
            )
            .unwrap();
        seen
    }

    #[test]
    fn set_then_get_roundtrips_through_the_typed_tree() {
        let store = StateStore::default();
        assert!(store.set("countdown.time_left", json!(7)).unwrap());
        assert_eq!(store.get("countdown.time_left"), Some(json!(7)));
        assert_eq!(store.snapshot().countdown.time_left, 7);
    }

    #[test]
    fn equal_value_is_a_silent_noop() {
        let store = StateStore::default();
        let changes = collect(&store, channels::CHANGE);
        assert!(store.set("spinner.count", json!(2)).unwrap());
        assert!(!store.set("spinner.count", json!(2)).unwrap());
        assert_eq!(changes.lock().unwrap().len(), 1);
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn path_listeners_fire_before_change_listeners() {
        let store = StateStore::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for channel in [channels::CHANGE, "spinner.count"] {
            let order = Arc::clone(&order);
            let tag = channel.to_string();
            store
                .on(
                    channel,
                    Listener::new(move |_| {
                        order.lock().unwrap().push(tag.clone());
                        Ok(())
                    }),
                )
                .unwrap();
        }
        store.set("spinner.count", json!(1)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["spinner.count", "change"]);
    }

    #[test]
    fn path_listener_receives_new_and_old_value() {
        let store = StateStore::default();
        let seen = collect(&store, "countdown.time_left");
        store.set("countdown.time_left", json!(5)).unwrap();
        store.set("countdown.time_left", json!(4)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[1],
            StoreEvent::Changed {
                path: "countdown.time_left".into(),
                value: json!(4),
                old_value: Some(json!(5)),
            }
        );
    }

    #[test]
    fn listeners_observe_committed_state() {
        let store = StateStore::default();
        let reader = store.clone();
        let observed = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&observed);
        store
            .on(
                channels::CHANGE,
                Listener::new(move |_| {
                    *slot.lock().unwrap() = reader.get("spinner.count");
                    Ok(())
                }),
            )
            .unwrap();
        store.set("spinner.count", json!(3)).unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(json!(3)));
    }

    #[test]
    fn invalid_paths_and_values_are_rejected() {
        let store = StateStore::default();
        assert!(matches!(
            store.set("theme.dark", json!(true)),
            Err(StateError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.set("spinner.count", json!("many")),
            Err(StateError::InvalidValue { .. })
        ));
        assert_eq!(store.snapshot(), AppState::default());
        assert_eq!(store.get("theme"), None);
    }

    #[test]
    fn derived_flags_follow_their_sources() {
        let store = StateStore::default();
        store.set("spinner.count", json!(2)).unwrap();
        assert!(store.snapshot().spinner.is_active);

        let seen = collect(&store, channels::CHANGE);
        assert_eq!(store.set("countdown.is_active", json!(true)), Ok(false));
        assert!(!store.snapshot().countdown.is_active);

        store.set("spinner.count", json!(0)).unwrap();
        seen.lock().unwrap().clear();
        let before = store.history().len();
        assert_eq!(store.set("spinner.is_active", json!(true)), Ok(false));
        assert_eq!(store.get("spinner.is_active"), Some(json!(false)));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(store.history().len(), before);
    }

    #[test]
    fn normalized_write_reports_the_stored_value() {
        let store = StateStore::default();
        let seen = collect(&store, "spinner");
        store
            .set("spinner", json!({ "is_active": false, "count": 3 }))
            .unwrap();
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StoreEvent::Changed { value, .. } => {
                assert_eq!(value, &json!({ "is_active": true, "count": 3 }))
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let store = StateStore::default();
        store
            .on(channels::CHANGE, Listener::new(|_| panic!("bad listener")))
            .unwrap();
        let seen = collect(&store, channels::CHANGE);
        store.set("spinner.count", json!(1)).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn once_and_off() {
        let store = StateStore::default();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let l = Listener::new(move |_: &StoreEvent| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        store.once("custom", l.clone()).unwrap();
        assert_eq!(store.emit("custom", StoreEvent::Custom(json!(1))), 1);
        assert_eq!(store.emit("custom", StoreEvent::Custom(json!(2))), 0);

        store.on("custom", l.clone()).unwrap();
        assert!(store.off("custom", &l));
        assert_eq!(store.listener_count("custom"), 0);
        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(store.on(" ", l).is_err());
    }

    #[test]
    fn cleanup_invokes_poll_stops_once() {
        let store = StateStore::default();
        store.add_job("j1", Default::default());
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        store
            .set_job_poll_stop("j1", move || *counter.lock().unwrap() += 1)
            .unwrap();
        let cleaned = collect(&store, channels::CLEANUP);

        store.cleanup();
        store.cleanup();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(cleaned.lock().unwrap().len(), 2);
    }
}

//! # Ordered listener collection and isolated dispatch.
//!
//! [`ListenerSet`] stores the listeners of one channel in subscription order.
//! [`dispatch`] and [`dispatch_async`] run a snapshot of them with fault isolation:
//!
//! - `Err` results are reported through `tracing::warn!` and not counted;
//! - panics are caught with `catch_unwind`, reported the same way, and not counted;
//! - the next listener always runs.
//!
//! **Warning**: `AssertUnwindSafe` is used, so a listener that panics while holding a
//! lock of its own can leave that state inconsistent.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tracing::warn;

use super::listener::{Listener, ListenerResult};
use crate::error::EventError;

/// Process-wide listener id counter.
static LISTENER_SEQ: AtomicU64 = AtomicU64::new(1);

struct Entry<T> {
    id: u64,
    listener: Listener<T>,
    once: bool,
}

/// Listeners of a single channel, in subscription order.
pub(crate) struct ListenerSet<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> ListenerSet<T> {
    /// Adds a listener and returns its id.
    ///
    /// Returns `None` and adds nothing if the same callback is already present.
    pub fn insert(&mut self, listener: Listener<T>, once: bool) -> Option<u64> {
        if self.entries.iter().any(|e| e.listener.same_as(&listener)) {
            return None;
        }
        let id = LISTENER_SEQ.fetch_add(1, Ordering::Relaxed);
        self.entries.push(Entry { id, listener, once });
        Some(id)
    }

    /// Removes a listener by callback identity.
    pub fn remove(&mut self, listener: &Listener<T>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.listener.same_as(listener));
        before != self.entries.len()
    }

    /// Removes a listener by the id returned from [`insert`](Self::insert).
    pub fn remove_id(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clones the current listeners for one emission and drops the one-shots.
    ///
    /// One-shots leave the set here, before any callback runs, so a re-entrant emit
    /// from inside a callback cannot fire them a second time.
    pub fn take_snapshot(&mut self) -> Vec<Listener<T>> {
        let snapshot = self.entries.iter().map(|e| e.listener.clone()).collect();
        self.entries.retain(|e| !e.once);
        snapshot
    }
}

/// Rejects empty or whitespace-only channel names.
pub(crate) fn validate_channel(name: &str) -> Result<(), EventError> {
    if name.trim().is_empty() {
        return Err(EventError::InvalidEventName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Runs `snapshot` in order and returns how many listeners completed successfully.
///
/// Async listeners are spawned on the current tokio runtime and counted once spawned.
/// Without a runtime they are skipped and reported.
pub(crate) fn dispatch<T>(channel: &str, snapshot: &[Listener<T>], payload: &Arc<T>) -> usize
where
    T: Send + Sync + 'static,
{
    let mut invoked = 0;
    for listener in snapshot {
        match listener {
            Listener::Sync(f) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| f(payload.as_ref())));
                if settle(channel, outcome) {
                    invoked += 1;
                }
            }
            Listener::Async(f) => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    warn!(channel, "async listener skipped: no tokio runtime");
                    continue;
                };
                let fut = match catch_unwind(AssertUnwindSafe(|| f(Arc::clone(payload)))) {
                    Ok(fut) => fut,
                    Err(panic) => {
                        report_panic(channel, &panic);
                        continue;
                    }
                };
                let channel = channel.to_string();
                handle.spawn(async move {
                    let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                    settle(&channel, outcome);
                });
                invoked += 1;
            }
        }
    }
    invoked
}

/// Runs `snapshot` sequentially, awaiting each listener before the next one starts.
pub(crate) async fn dispatch_async<T>(
    channel: &str,
    snapshot: &[Listener<T>],
    payload: &Arc<T>,
) -> usize
where
    T: Send + Sync + 'static,
{
    let mut invoked = 0;
    for listener in snapshot {
        let ok = match listener {
            Listener::Sync(f) => {
                settle(channel, catch_unwind(AssertUnwindSafe(|| f(payload.as_ref()))))
            }
            Listener::Async(f) => {
                match catch_unwind(AssertUnwindSafe(|| f(Arc::clone(payload)))) {
                    Ok(fut) => settle(channel, AssertUnwindSafe(fut).catch_unwind().await),
                    Err(panic) => {
                        report_panic(channel, &panic);
                        false
                    }
                }
            }
        };
        if ok {
            invoked += 1;
        }
    }
    invoked
}

/// Reports a failed invocation and returns whether it succeeded.
fn settle(channel: &str, outcome: Result<ListenerResult, Box<dyn Any + Send>>) -> bool {
    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(channel, error = %err, "listener failed");
            false
        }
        Err(panic) => {
            report_panic(channel, &panic);
            false
        }
    }
}

fn report_panic(channel: &str, panic: &Box<dyn Any + Send>) {
    warn!(channel, info = %panic_message(panic), "listener panicked");
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    let any = &**panic;
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Listener<u32> {
        let log = Arc::clone(log);
        Listener::new(move |_| {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn blank_channel_names_are_rejected() {
        assert!(validate_channel("").is_err());
        assert!(validate_channel("   ").is_err());
        assert!(validate_channel("job:added").is_ok());
    }

    #[test]
    fn insert_deduplicates_by_identity() {
        let mut set = ListenerSet::default();
        let l: Listener<u32> = Listener::new(|_| Ok(()));
        assert!(set.insert(l.clone(), false).is_some());
        assert_eq!(set.insert(l.clone(), true), None);
        assert_eq!(set.len(), 1);
        assert!(set.remove(&l));
        assert!(set.is_empty());
    }

    #[test]
    fn snapshot_drops_one_shots() {
        let mut set = ListenerSet::default();
        set.insert(Listener::<u32>::new(|_| Ok(())), true);
        set.insert(Listener::<u32>::new(|_| Ok(())), false);
        assert_eq!(set.take_snapshot().len(), 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn failures_are_isolated_and_not_counted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snapshot = vec![
            recorder(&log, "first"),
            Listener::new(|_: &u32| Err(anyhow::anyhow!("boom"))),
            Listener::new(|_: &u32| panic!("listener exploded")),
            recorder(&log, "last"),
        ];
        let invoked = dispatch("test", &snapshot, &Arc::new(7));
        assert_eq!(invoked, 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "last"]);
    }

    #[tokio::test]
    async fn async_dispatch_is_sequential() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow = {
            let log = Arc::clone(&log);
            Listener::from_async(move |_: Arc<u32>| {
                let log = Arc::clone(&log);
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    log.lock().unwrap().push("slow");
                    Ok(())
                }
            })
        };
        let snapshot = vec![slow, recorder(&log, "fast")];
        let invoked = dispatch_async("test", &snapshot, &Arc::new(1)).await;
        assert_eq!(invoked, 2);
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }
}

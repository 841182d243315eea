//! # Poller: registry of named poll loops.
//!
//! [`Poller`] starts, deduplicates, inspects and stops poll loops keyed by id. Each loop
//! is a [`PollActor`] on its own tokio task with its own [`CancellationToken`].
//!
//! ## Architecture
//! ```text
//! start(id, probe, opts)
//!   ├─► id active? ──► return existing PollHandle (new probe/opts discarded)
//!   └─► register Entry { handle(generation), state } ──► spawn PollActor::run
//!                                                             │
//!   stop(id) / PollHandle::cancel ──► token.cancel() ─────────┤
//!                                                             ▼
//!                                     finish(id, generation) removes the entry
//! ```
//!
//! ## Rules
//! - At most one loop per id; `get_active` lists ids in start order.
//! - Entries are removed whenever a loop ends, for any reason.
//! - Removal is generation-checked: a handle or a finishing actor from an older loop
//!   never touches a newer loop that reuses the id.
//! - `start`/`stop` never fail; probe failures only reach `on_error`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::polling::actor::{ExitReason, LoopState, PollActor};
use crate::polling::options::PollOptions;
use crate::polling::probe::{ProbeOutcome, ProbeRef};

/// Lifecycle of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Active,
    Stopped,
}

/// Point-in-time view of one loop.
#[derive(Debug, Clone)]
pub struct PollInfo {
    pub id: String,
    pub status: LoopStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Consecutive failed probes.
    pub retries: u32,
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Last successful result, serialized.
    pub last_result: Option<Value>,
}

/// Cancels one poll loop.
///
/// Cloning is cheap; every clone cancels the same loop. Cancelling is idempotent and
/// has no effect on a later loop started under the same id.
#[derive(Clone)]
pub struct PollHandle {
    id: String,
    generation: u64,
    token: CancellationToken,
    registry: Weak<Registry>,
}

impl PollHandle {
    /// Stops the loop and forgets it. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_current(&self.id, self.generation);
        }
    }

    /// `true` once the loop was cancelled through any handle or `stop`.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wraps [`cancel`](Self::cancel) as a plain closure, e.g. for
    /// [`StateStore::set_job_poll_stop`](crate::StateStore::set_job_poll_stop).
    pub fn canceller(&self) -> impl Fn() + Send + Sync + 'static {
        let handle = self.clone();
        move || handle.cancel()
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

struct Entry {
    handle: PollHandle,
    state: Arc<Mutex<LoopState>>,
}

pub(crate) struct Registry {
    loops: Mutex<IndexMap<String, Entry>>,
    generation: AtomicU64,
}

impl Registry {
    fn loops(&self) -> MutexGuard<'_, IndexMap<String, Entry>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `id` if it still belongs to `generation`.
    pub(crate) fn remove_if_current(&self, id: &str, generation: u64) -> bool {
        let mut loops = self.loops();
        match loops.get(id) {
            Some(entry) if entry.handle.generation == generation => {
                loops.shift_remove(id);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let loops = self.loops.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in loops.drain(..) {
            entry.handle.token.cancel();
        }
    }
}

/// Named, deduplicated poll loops.
///
/// Cheap to clone; clones share the same loops. Dropping the last clone cancels every loop.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use appcore::{PollOptions, Poller, ProbeError, ProbeFn, ProbeRef};
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let poller = Poller::new();
/// let probe: ProbeRef<Value> =
///     ProbeFn::arc(|| async { Ok::<_, ProbeError>(json!({ "status": "completed" })) });
///
/// let handle = poller.start(
///     "job-1",
///     probe,
///     PollOptions::new()
///         .interval(Duration::from_secs(1))
///         .on_complete(|r: &Value| println!("done: {r}")),
/// );
/// assert!(poller.is_active("job-1"));
/// handle.cancel();
/// assert!(!poller.is_active("job-1"));
/// # }
/// ```
#[derive(Clone)]
pub struct Poller {
    registry: Arc<Registry>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("active", &self.get_active())
            .finish()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                loops: Mutex::new(IndexMap::new()),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Starts polling `id`, probing immediately.
    ///
    /// If `id` is already active, its existing handle is returned and `probe`/`opts` are
    /// discarded. Outside a tokio runtime nothing is started and an already-cancelled
    /// handle is returned.
    pub fn start<R>(&self, id: &str, probe: ProbeRef<R>, opts: PollOptions<R>) -> PollHandle
    where
        R: ProbeOutcome + Serialize + Send + Sync + 'static,
    {
        let mut loops = self.registry.loops();
        if let Some(existing) = loops.get(id) {
            debug!(poll = id, "already active; reusing handle");
            return existing.handle.clone();
        }

        let handle = PollHandle {
            id: id.to_string(),
            generation: self.registry.generation.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            registry: Arc::downgrade(&self.registry),
        };
        let Ok(rt) = Handle::try_current() else {
            warn!(poll = id, "poll not started: no tokio runtime");
            handle.token.cancel();
            return handle;
        };

        let state = Arc::new(Mutex::new(LoopState::new()));
        loops.insert(
            id.to_string(),
            Entry {
                handle: handle.clone(),
                state: Arc::clone(&state),
            },
        );
        drop(loops);

        let registry = Arc::downgrade(&self.registry);
        let (id, generation) = (handle.id.clone(), handle.generation);
        let actor = PollActor {
            id: id.clone(),
            probe,
            opts,
            state,
            registry: registry.clone(),
            generation,
        };
        let token = handle.token.clone();
        rt.spawn(async move {
            let reason = actor.run(token).await;
            if let Some(registry) = registry.upgrade() {
                registry.remove_if_current(&id, generation);
            }
            match reason {
                ExitReason::Cancelled => debug!(poll = %id, "poll loop cancelled"),
                _ => info!(poll = %id, reason = reason.as_label(), "poll loop stopped"),
            }
        });

        debug!(poll = %handle.id, "poll loop started");
        handle
    }

    /// Stops loop `id`. Returns `false` if it was not active.
    pub fn stop(&self, id: &str) -> bool {
        let removed = self.registry.loops().shift_remove(id);
        match removed {
            Some(entry) => {
                entry.handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops every loop and returns how many were active.
    pub fn stop_all(&self) -> usize {
        let entries: Vec<Entry> = self.registry.loops().drain(..).map(|(_, e)| e).collect();
        for entry in &entries {
            entry.handle.token.cancel();
        }
        entries.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.registry.loops().contains_key(id)
    }

    /// Active ids in start order.
    pub fn get_active(&self) -> Vec<String> {
        self.registry.loops().keys().cloned().collect()
    }

    pub fn get_poll_info(&self, id: &str) -> Option<PollInfo> {
        self.registry.loops().get(id).map(|e| snapshot(id, e))
    }

    /// Info of every active loop, in start order.
    pub fn get_all_poll_info(&self) -> Vec<PollInfo> {
        self.registry
            .loops()
            .iter()
            .map(|(id, e)| snapshot(id, e))
            .collect()
    }

    /// Stops everything; the poller stays usable.
    pub fn cleanup(&self) {
        let stopped = self.stop_all();
        if stopped > 0 {
            debug!(stopped, "poller cleaned up");
        }
    }
}

fn snapshot(id: &str, entry: &Entry) -> PollInfo {
    let state = entry.state.lock().unwrap_or_else(PoisonError::into_inner);
    PollInfo {
        id: id.to_string(),
        status: if entry.handle.token.is_cancelled() {
            LoopStatus::Stopped
        } else {
            LoopStatus::Active
        },
        started_at: state.started_at,
        elapsed: state.started.elapsed(),
        retries: state.retries,
        last_poll_at: state.last_poll_at,
        last_result: state.last_result.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PollError, ProbeError};
    use crate::policies::{BackoffPolicy, JitterPolicy};
    use crate::polling::probe::ProbeFn;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio::time::{sleep, Instant};

    /// Probe returning `statuses` in order (the last one repeats) and logging call times.
    fn scripted(
        statuses: &'static [&'static str],
        calls: &Arc<Mutex<Vec<Instant>>>,
    ) -> ProbeRef<Value> {
        let calls = Arc::clone(calls);
        ProbeFn::arc(move || {
            let mut log = calls.lock().unwrap();
            log.push(Instant::now());
            let i = (log.len() - 1).min(statuses.len() - 1);
            let status = statuses[i];
            async move { Ok::<_, ProbeError>(json!({ "status": status })) }
        })
    }

    fn failing(calls: &Arc<Mutex<Vec<Instant>>>) -> ProbeRef<Value> {
        let calls = Arc::clone(calls);
        ProbeFn::arc(move || {
            calls.lock().unwrap().push(Instant::now());
            async { Err::<Value, _>(anyhow::anyhow!("503")) }
        })
    }

    fn gaps(calls: &Arc<Mutex<Vec<Instant>>>) -> Vec<Duration> {
        let calls = calls.lock().unwrap();
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> u32) {
        let n = Arc::new(AtomicU32::new(0));
        let read = Arc::clone(&n);
        (n, move || read.load(Ordering::SeqCst))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_terminal_status() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (updates, update_count) = counter();
        let (completes, complete_count) = counter();

        poller.start(
            "job",
            scripted(&["queued", "processing", "completed"], &calls),
            PollOptions::new()
                .interval(secs(1))
                .on_update(move |_| {
                    updates.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move |r: &Value| {
                    assert_eq!(r["status"], "completed");
                    completes.fetch_add(1, Ordering::SeqCst);
                }),
        );
        sleep(secs(10)).await;

        assert_eq!(update_count(), 3);
        assert_eq!(complete_count(), 1);
        assert_eq!(gaps(&calls), vec![secs(1), secs(1)]);
        assert!(!poller.is_active("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_is_terminal_too() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (completes, complete_count) = counter();
        poller.start(
            "job",
            scripted(&["failed"], &calls),
            PollOptions::new().on_complete(move |_| {
                completes.fetch_add(1, Ordering::SeqCst);
            }),
        );
        sleep(secs(30)).await;
        assert_eq!(complete_count(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn on_complete_may_restart_the_same_id() {
        let poller = Poller::new();
        let first_calls = Arc::new(Mutex::new(Vec::new()));
        let next_calls = Arc::new(Mutex::new(Vec::new()));
        let seen_active = Arc::new(Mutex::new(None));

        let restarter = poller.clone();
        let next_probe = scripted(&["queued"], &next_calls);
        let seen = Arc::clone(&seen_active);
        poller.start(
            "job",
            scripted(&["completed"], &first_calls),
            PollOptions::new().on_complete(move |_: &Value| {
                *seen.lock().unwrap() = Some(restarter.is_active("job"));
                restarter.start(
                    "job",
                    Arc::clone(&next_probe),
                    PollOptions::new().interval(secs(1)),
                );
            }),
        );
        sleep(secs(3)).await;

        assert_eq!(*seen_active.lock().unwrap(), Some(false));
        assert_eq!(first_calls.lock().unwrap().len(), 1);
        assert!(next_calls.lock().unwrap().len() >= 3);
        assert_eq!(poller.get_active(), vec!["job"]);
        poller.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn final_error_sees_the_loop_inactive() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let states = Arc::new(Mutex::new(Vec::new()));
        let observer = poller.clone();
        let sink = Arc::clone(&states);

        poller.start(
            "job",
            failing(&calls),
            PollOptions::new()
                .interval(secs(1))
                .max_retries(1)
                .on_error(move |_: &PollError| {
                    sink.lock().unwrap().push(observer.is_active("job"));
                }),
        );
        sleep(secs(10)).await;

        assert_eq!(*states.lock().unwrap(), vec![true, false]);
        assert!(poller.get_active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_returns_existing_handle() {
        let poller = Poller::new();
        let first_calls = Arc::new(Mutex::new(Vec::new()));
        let second_calls = Arc::new(Mutex::new(Vec::new()));

        let a = poller.start("job", scripted(&["queued"], &first_calls), PollOptions::new());
        let b = poller.start("job", scripted(&["queued"], &second_calls), PollOptions::new());
        sleep(secs(12)).await;

        assert_eq!(a.generation, b.generation);
        assert_eq!(poller.get_active(), vec!["job"]);
        assert!(second_calls.lock().unwrap().is_empty());
        assert_eq!(first_calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);

        poller.start(
            "job",
            failing(&calls),
            PollOptions::new()
                .interval(secs(1))
                .max_retries(3)
                .on_error(move |e: &PollError| sink.lock().unwrap().push(e.as_label())),
        );
        sleep(secs(60)).await;

        assert_eq!(calls.lock().unwrap().len(), 4);
        assert_eq!(gaps(&calls), vec![secs(2), secs(4), secs(8)]);
        assert_eq!(errors.lock().unwrap().len(), 4);
        assert!(!poller.is_active("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped_at_sixty_seconds() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        poller.start(
            "job",
            failing(&calls),
            PollOptions::new().interval(secs(10)).max_retries(4),
        );
        sleep(secs(600)).await;
        assert_eq!(gaps(&calls), vec![secs(20), secs(40), secs(60), secs(60)]);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_retry_counter() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        // fail, fail, ok, fail, ...
        let probe: ProbeRef<Value> = ProbeFn::arc(move || {
            let mut log = log.lock().unwrap();
            log.push(Instant::now());
            let ok = log.len() == 3;
            async move {
                if ok {
                    Ok(json!({ "status": "processing" }))
                } else {
                    Err(anyhow::anyhow!("flaky"))
                }
            }
        });
        poller.start("job", probe, PollOptions::new().interval(secs(1)));
        sleep(secs(10)).await;

        // 2s, 4s backoff; then interval 1s; then backoff restarts at 2s.
        assert_eq!(gaps(&calls)[..4], [secs(2), secs(4), secs(1), secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_stops_the_loop() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        poller.start(
            "job",
            scripted(&["processing"], &calls),
            PollOptions::new()
                .interval(secs(1))
                .max_duration(Some(Duration::from_millis(2500)))
                .on_error(move |e| sink.lock().unwrap().push(e.as_label())),
        );
        sleep(secs(10)).await;

        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(*errors.lock().unwrap(), vec!["poll_duration_exceeded"]);
        assert!(!poller.is_active("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_next_cycle() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        poller.start("job", scripted(&["queued"], &calls), PollOptions::new());
        sleep(Duration::from_millis(100)).await;

        assert!(poller.stop("job"));
        assert!(!poller.stop("job"));
        sleep(secs(30)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handle_does_not_stop_a_newer_loop() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let old = poller.start("job", scripted(&["queued"], &calls), PollOptions::new());
        old.cancel();
        assert!(!poller.is_active("job"));

        let new = poller.start("job", scripted(&["queued"], &calls), PollOptions::new());
        old.cancel();
        assert!(poller.is_active("job"));
        assert!(!new.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_loop_does_not_remove_its_successor() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = poller.start("job", scripted(&["queued"], &calls), PollOptions::new());
        poller.stop("job");
        poller.start("job", scripted(&["queued"], &calls), PollOptions::new());
        sleep(secs(1)).await;

        assert!(first.is_cancelled());
        assert!(poller.is_active("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_panics_are_reported_as_errors() {
        let poller = Poller::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let probe: ProbeRef<Value> = ProbeFn::arc(|| async {
            if true {
                panic!("probe exploded");
            }
            Ok::<Value, ProbeError>(Value::Null)
        });
        poller.start(
            "job",
            probe,
            PollOptions::new()
                .max_retries(0)
                .on_error(move |e| sink.lock().unwrap().push(e.to_string())),
        );
        sleep(secs(1)).await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("probe exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn callback_panics_do_not_end_the_loop() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        poller.start(
            "job",
            scripted(&["queued"], &calls),
            PollOptions::new()
                .interval(secs(1))
                .on_update(|_| panic!("bad subscriber")),
        );
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert!(poller.is_active("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn info_and_bulk_stop() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for id in ["b", "a", "c"] {
            poller.start(id, scripted(&["processing"], &calls), PollOptions::new());
        }
        sleep(Duration::from_millis(10)).await;

        assert_eq!(poller.get_active(), vec!["b", "a", "c"]);
        let info = poller.get_poll_info("a").unwrap();
        assert_eq!(info.status, LoopStatus::Active);
        assert_eq!(info.retries, 0);
        assert_eq!(info.last_result, Some(json!({ "status": "processing" })));
        assert!(info.last_poll_at.is_some());
        assert_eq!(poller.get_all_poll_info().len(), 3);
        assert!(poller.get_poll_info("zzz").is_none());

        assert_eq!(poller.stop_all(), 3);
        assert_eq!(poller.stop_all(), 0);
        assert!(poller.get_active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_visible_in_poll_info() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        poller.start("job", failing(&calls), PollOptions::new().interval(secs(1)));
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(poller.get_poll_info("job").unwrap().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_keeps_delays_within_the_cap() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backoff = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..BackoffPolicy::default()
        };
        poller.start(
            "job",
            failing(&calls),
            PollOptions::new().interval(secs(1)).max_retries(3).backoff(backoff),
        );
        sleep(secs(60)).await;
        for (gap, full) in gaps(&calls).into_iter().zip([2u64, 4, 8]) {
            assert!(gap >= Duration::from_millis(full * 500));
            assert!(gap <= secs(full));
        }
    }

    #[test]
    fn start_without_runtime_is_inert() {
        let poller = Poller::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handle = poller.start("job", scripted(&["queued"], &calls), PollOptions::new());
        assert!(handle.is_cancelled());
        assert!(!poller.is_active("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_poller_cancels_loops() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let poller = Poller::new();
            poller.start("job", scripted(&["queued"], &calls), PollOptions::new())
        };
        assert!(handle.is_cancelled());
        sleep(secs(30)).await;
        assert!(calls.lock().unwrap().len() <= 1);
    }
}

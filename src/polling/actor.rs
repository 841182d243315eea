//! # PollActor: one poll loop.
//!
//! Runs the probe of a single loop until a terminal result, retry exhaustion, the
//! duration ceiling, or cancellation.
//!
//! ## Architecture
//! ```text
//! Poller::start ──► PollActor::run()
//!
//! loop {
//!   ├─► elapsed > max_duration? ──► on_error(DurationExceeded) → exit
//!   ├─► probe() (cancellable, panics caught)
//!   │     ├─► Ok(r)  → on_update(r)
//!   │     │            ├─► terminal → on_complete(r) → exit
//!   │     │            └─► retries = 0, delay = interval
//!   │     └─► Err(e) → on_error(e)
//!   │                  ├─► retries >= max_retries → exit
//!   │                  └─► retries += 1, delay = backoff(interval, retries)
//!   └─► sleep(delay) (cancellable)
//! }
//! ```
//!
//! ## Rules
//! - Cycles run **sequentially**; the next one is scheduled only after the probe settled.
//! - Cancellation is observed during the probe and during the sleep; no callback runs
//!   after it.
//! - Callback panics are logged and never end the loop.
//! - A loop leaves the registry **before** its final `on_complete`/`on_error`, so those
//!   callbacks see it inactive and may start a new loop under the same id.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PollError;
use crate::listeners::panic_message;
use crate::polling::options::PollOptions;
use crate::polling::poller::Registry;
use crate::polling::probe::{ProbeOutcome, ProbeRef};

/// Why a loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Completed,
    RetriesExhausted,
    DurationExceeded,
    Cancelled,
}

impl ExitReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            ExitReason::Completed => "completed",
            ExitReason::RetriesExhausted => "retries_exhausted",
            ExitReason::DurationExceeded => "duration_exceeded",
            ExitReason::Cancelled => "cancelled",
        }
    }
}

/// Mutable bookkeeping shared between the actor and poll-info snapshots.
#[derive(Debug, Clone)]
pub(crate) struct LoopState {
    pub started_at: DateTime<Utc>,
    pub started: time::Instant,
    pub retries: u32,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_result: Option<Value>,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: time::Instant::now(),
            retries: 0,
            last_poll_at: None,
            last_result: None,
        }
    }
}

pub(crate) struct PollActor<R: Send + 'static> {
    pub id: String,
    pub probe: ProbeRef<R>,
    pub opts: PollOptions<R>,
    pub state: Arc<Mutex<LoopState>>,
    pub registry: Weak<Registry>,
    pub generation: u64,
}

impl<R> PollActor<R>
where
    R: ProbeOutcome + Serialize + Send + Sync + 'static,
{
    /// Runs the loop until one of the exit conditions is met.
    pub async fn run(self, token: CancellationToken) -> ExitReason {
        let started = self.lock_state().started;
        let mut retries: u32 = 0;

        loop {
            if token.is_cancelled() {
                return ExitReason::Cancelled;
            }
            if let Some(max) = self.opts.max_duration {
                let elapsed = started.elapsed();
                if elapsed > max {
                    self.retire();
                    self.report_error(&PollError::DurationExceeded { max, elapsed });
                    return ExitReason::DurationExceeded;
                }
            }

            let outcome = select! {
                res = AssertUnwindSafe(self.probe.probe()).catch_unwind() => res,
                _ = token.cancelled() => return ExitReason::Cancelled,
            };

            let delay = match outcome {
                Ok(Ok(result)) => {
                    retries = 0;
                    self.record_success(&result);
                    self.invoke("on_update", self.opts.on_update.as_deref(), &result);
                    if result.is_terminal() {
                        self.retire();
                        self.invoke("on_complete", self.opts.on_complete.as_deref(), &result);
                        return ExitReason::Completed;
                    }
                    self.opts.interval
                }
                Ok(Err(source)) => {
                    let err = PollError::ProbeFailed { retries, source };
                    match self.on_failure(&mut retries, err) {
                        Some(delay) => delay,
                        None => return ExitReason::RetriesExhausted,
                    }
                }
                Err(panic) => {
                    let err = PollError::ProbePanicked {
                        retries,
                        info: panic_message(&panic),
                    };
                    match self.on_failure(&mut retries, err) {
                        Some(delay) => delay,
                        None => return ExitReason::RetriesExhausted,
                    }
                }
            };

            select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => return ExitReason::Cancelled,
            }
        }
    }

    /// Reports a failed cycle and returns the retry delay, or `None` once retries are spent.
    fn on_failure(&self, retries: &mut u32, err: PollError) -> Option<Duration> {
        self.lock_state().last_poll_at = Some(Utc::now());
        if *retries >= self.opts.max_retries {
            self.retire();
            self.report_error(&err);
            return None;
        }
        self.report_error(&err);
        *retries += 1;
        self.lock_state().retries = *retries;

        let delay = self.opts.backoff.delay(self.opts.interval, *retries);
        debug!(poll = %self.id, retries = *retries, ?delay, "retry scheduled");
        Some(delay)
    }

    /// Drops this loop's registry entry unless a newer loop already owns the id.
    fn retire(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_current(&self.id, self.generation);
        }
    }

    fn record_success(&self, result: &R) {
        let snapshot = serde_json::to_value(result).ok();
        let mut state = self.lock_state();
        state.retries = 0;
        state.last_poll_at = Some(Utc::now());
        state.last_result = snapshot;
    }

    fn report_error(&self, err: &PollError) {
        match self.opts.on_error.as_deref() {
            Some(f) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(err))) {
                    warn!(poll = %self.id, info = %panic_message(&panic), "on_error panicked");
                }
            }
            None => warn!(poll = %self.id, error = %err, "poll error"),
        }
    }

    fn invoke(&self, name: &'static str, f: Option<&(dyn Fn(&R) + Send + Sync)>, result: &R) {
        let Some(f) = f else { return };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(result))) {
            warn!(poll = %self.id, callback = name, info = %panic_message(&panic), "callback panicked");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

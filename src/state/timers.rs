//! Countdown, spinner and job monitor.
//!
//! The countdown and the job monitor are tokio tasks holding a [`Weak`] reference to the
//! store, so a dropped store ends them at their next wake-up. Each is cancelled through
//! its own [`CancellationToken`].

use std::sync::{PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::event::{channels, StoreEvent};
use crate::state::model::Countdown;
use crate::state::store::{to_json, Inner, StateStore};

const JOB_MONITOR: &str = "jobs";

impl StateStore {
    /// Starts the refresh countdown, replacing any running one.
    ///
    /// `time_left` restarts from the configured initial value and is decremented every
    /// tick; after `1` it wraps back to the initial value. Returns `false` (and does
    /// nothing) outside a tokio runtime.
    pub fn start_countdown(&self, job_id: Option<&str>) -> bool {
        let Ok(handle) = Handle::try_current() else {
            warn!("countdown not started: no tokio runtime");
            return false;
        };
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_countdown().replace(token.clone()) {
            previous.cancel();
        }

        let next = Countdown {
            time_left: self.inner.settings.countdown_initial,
            is_active: true,
            job_id: job_id.map(str::to_string),
        };
        let old = std::mem::replace(&mut self.state().countdown, next.clone());
        debug!(job = ?next.job_id, "countdown started");

        self.commit("countdown".into(), to_json(&next), Some(to_json(&old)));
        self.publish(
            channels::COUNTDOWN_STARTED,
            StoreEvent::CountdownStarted {
                job_id: next.job_id,
                time_left: next.time_left,
            },
        );

        handle.spawn(run_countdown(
            self.downgrade(),
            token,
            self.inner.settings.countdown_tick,
        ));
        true
    }

    /// Restores `time_left` to the initial value without stopping the ticks.
    pub fn reset_countdown(&self) -> bool {
        let initial = self.inner.settings.countdown_initial;
        let old = {
            let mut state = self.state();
            if state.countdown.time_left == initial {
                return false;
            }
            std::mem::replace(&mut state.countdown.time_left, initial)
        };
        self.commit(
            "countdown.time_left".into(),
            Value::from(initial),
            Some(Value::from(old)),
        );
        true
    }

    /// Stops the countdown. Returns `false` when none was running.
    pub fn clear_countdown(&self) -> bool {
        let Some(token) = self.lock_countdown().take() else {
            return false;
        };
        token.cancel();

        let (old, next) = {
            let mut state = self.state();
            let old = state.countdown.clone();
            state.countdown.is_active = false;
            state.countdown.job_id = None;
            (old, state.countdown.clone())
        };
        debug!("countdown cleared");

        self.commit("countdown".into(), to_json(&next), Some(to_json(&old)));
        self.publish(channels::COUNTDOWN_CLEARED, StoreEvent::CountdownCleared);
        true
    }

    /// Applies one tick unless `token` was cancelled meanwhile.
    fn tick_countdown(&self, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        let initial = self.inner.settings.countdown_initial;
        let (old, next, job_id) = {
            let mut state = self.state();
            let old = state.countdown.time_left;
            let next = if old <= 1 { initial } else { old - 1 };
            state.countdown.time_left = next;
            (old, next, state.countdown.job_id.clone())
        };
        self.commit(
            "countdown.time_left".into(),
            Value::from(next),
            Some(Value::from(old)),
        );
        self.publish(
            channels::COUNTDOWN_TICK,
            StoreEvent::CountdownTick {
                job_id,
                time_left: next,
            },
        );
    }

    /// Increments the spinner counter; publishes `spinner:shown` on `0 → 1`.
    ///
    /// Returns the new count.
    pub fn show_spinner(&self) -> u32 {
        let (old, next) = {
            let mut state = self.state();
            let old = state.spinner.clone();
            state.spinner.count = state.spinner.count.saturating_add(1);
            state.spinner.is_active = true;
            (old, state.spinner.clone())
        };
        self.commit("spinner".into(), to_json(&next), Some(to_json(&old)));
        if old.count == 0 {
            self.publish(channels::SPINNER_SHOWN, StoreEvent::SpinnerShown);
        }
        next.count
    }

    /// Decrements the spinner counter (floored at 0); publishes `spinner:hidden` on `1 → 0`.
    pub fn hide_spinner(&self) -> u32 {
        let (old, next) = {
            let mut state = self.state();
            if state.spinner.count == 0 {
                return 0;
            }
            let old = state.spinner.clone();
            state.spinner.count -= 1;
            state.spinner.is_active = state.spinner.count > 0;
            (old, state.spinner.clone())
        };
        self.commit("spinner".into(), to_json(&next), Some(to_json(&old)));
        if next.count == 0 {
            self.publish(channels::SPINNER_HIDDEN, StoreEvent::SpinnerHidden);
        }
        next.count
    }

    /// Resets the spinner regardless of nesting. Returns `false` if it was not shown.
    pub fn force_hide_spinner(&self) -> bool {
        let old = {
            let mut state = self.state();
            if state.spinner.count == 0 {
                return false;
            }
            std::mem::take(&mut state.spinner)
        };
        self.commit(
            "spinner".into(),
            to_json(&crate::state::model::Spinner::default()),
            Some(to_json(&old)),
        );
        self.publish(channels::SPINNER_HIDDEN, StoreEvent::SpinnerHidden);
        true
    }

    /// Periodically removes terminal jobs not updated within `max_age`.
    ///
    /// Replaces a running monitor. Returns `false` outside a tokio runtime.
    pub fn start_job_monitor(&self, every: Duration, max_age: Duration) -> bool {
        let Ok(handle) = Handle::try_current() else {
            warn!("job monitor not started: no tokio runtime");
            return false;
        };
        let token = CancellationToken::new();
        if let Some(previous) = self
            .lock_monitors()
            .insert(JOB_MONITOR.to_string(), token.clone())
        {
            previous.cancel();
        }
        handle.spawn(run_job_monitor(self.downgrade(), token, every, max_age));
        true
    }

    /// Cancels the job monitor. Returns `false` when none was running.
    pub fn stop_job_monitor(&self) -> bool {
        let tokens: Vec<CancellationToken> =
            self.lock_monitors().drain(..).map(|(_, t)| t).collect();
        tokens.iter().for_each(CancellationToken::cancel);
        !tokens.is_empty()
    }

    /// Removes terminal jobs whose `updated_at` is at least `max_age` old; returns their ids.
    pub fn prune_stale_jobs(&self, max_age: Duration) -> Vec<String> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Vec::new();
        };
        let stale: Vec<String> = self
            .state()
            .jobs
            .iter()
            .filter(|(_, job)| job.status.is_terminal() && job.updated_at <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.remove_job(id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "pruned stale jobs");
        }
        stale
    }

    fn lock_countdown(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner.countdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_monitors(
        &self,
    ) -> std::sync::MutexGuard<'_, indexmap::IndexMap<String, CancellationToken>> {
        self.inner.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_countdown(store: Weak<Inner>, token: CancellationToken, tick: Duration) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = token.cancelled() => break,
        }
        let Some(inner) = store.upgrade() else { break };
        StateStore::from_inner(inner).tick_countdown(&token);
    }
}

async fn run_job_monitor(
    store: Weak<Inner>,
    token: CancellationToken,
    every: Duration,
    max_age: Duration,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = token.cancelled() => break,
        }
        let Some(inner) = store.upgrade() else { break };
        StateStore::from_inner(inner).prune_stale_jobs(max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::Listener;
    use crate::state::model::{JobPatch, JobStatus};
    use crate::state::store::StoreSettings;
    use std::sync::{Arc, Mutex};

    fn short_countdown() -> StateStore {
        StateStore::with_settings(StoreSettings {
            countdown_initial: 3,
            ..StoreSettings::default()
        })
    }

    fn ticks(store: &StateStore) -> Arc<Mutex<Vec<u32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .on(
                channels::COUNTDOWN_TICK,
                Listener::new(move |e: &StoreEvent| {
                    if let StoreEvent::CountdownTick { time_left, .. } = e {
                        sink.lock().unwrap().push(*time_left);
                    }
                    Ok(())
                }),
            )
            .unwrap();
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_and_wraps_to_initial() {
        let store = short_countdown();
        let seen = ticks(&store);
        assert!(store.start_countdown(Some("j1")));
        assert!(store.snapshot().countdown.is_active);

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 3, 2]);
        assert_eq!(store.snapshot().countdown.job_id.as_deref(), Some("j1"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_running_countdown() {
        let store = short_countdown();
        let seen = ticks(&store);
        store.start_countdown(None);
        store.start_countdown(None);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_ticks_and_is_idempotent() {
        let store = short_countdown();
        let seen = ticks(&store);
        store.start_countdown(None);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.clear_countdown());
        assert!(!store.clear_countdown());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert!(!store.snapshot().countdown.is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_keeps_ticking() {
        let store = short_countdown();
        let seen = ticks(&store);
        store.start_countdown(None);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.reset_countdown());
        assert_eq!(store.snapshot().countdown.time_left, 3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2, 2]);
    }

    #[test]
    fn countdown_needs_a_runtime() {
        let store = StateStore::default();
        assert!(!store.start_countdown(None));
        assert!(!store.snapshot().countdown.is_active);
    }

    #[test]
    fn spinner_is_reference_counted() {
        let store = StateStore::default();
        let events = Arc::new(Mutex::new(Vec::new()));
        for channel in [channels::SPINNER_SHOWN, channels::SPINNER_HIDDEN] {
            let events = Arc::clone(&events);
            store
                .on(
                    channel,
                    Listener::new(move |e: &StoreEvent| {
                        events.lock().unwrap().push(e.kind());
                        Ok(())
                    }),
                )
                .unwrap();
        }

        assert_eq!(store.show_spinner(), 1);
        assert_eq!(store.show_spinner(), 2);
        assert_eq!(store.show_spinner(), 3);
        assert_eq!(store.hide_spinner(), 2);
        assert_eq!(store.hide_spinner(), 1);
        assert!(store.snapshot().spinner.is_active);
        assert_eq!(store.hide_spinner(), 0);
        assert!(!store.snapshot().spinner.is_active);

        // Extra hide at zero stays floored and silent.
        assert_eq!(store.hide_spinner(), 0);
        assert_eq!(store.snapshot().spinner.count, 0);
        assert_eq!(*events.lock().unwrap(), vec!["spinner_shown", "spinner_hidden"]);
    }

    #[test]
    fn force_hide_ignores_nesting() {
        let store = StateStore::default();
        store.show_spinner();
        store.show_spinner();
        assert!(store.force_hide_spinner());
        assert!(!store.force_hide_spinner());
        assert_eq!(store.snapshot().spinner.count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn job_monitor_prunes_terminal_jobs() {
        let store = StateStore::default();
        store.add_job("done", JobPatch::status(JobStatus::Completed));
        store.add_job("running", JobPatch::status(JobStatus::Processing));

        assert!(store.start_job_monitor(Duration::from_secs(1), Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.get_job("done").is_none());
        assert!(store.get_job("running").is_some());
        assert!(store.stop_job_monitor());
        assert!(!store.stop_job_monitor());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_stops_countdown_and_monitor() {
        let store = short_countdown();
        let seen = ticks(&store);
        store.start_countdown(None);
        store.start_job_monitor(Duration::from_secs(1), Duration::ZERO);

        store.cleanup();
        store.add_job("done", JobPatch::status(JobStatus::Failed));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(store.get_job("done").is_some());
    }
}

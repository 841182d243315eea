//! # LogWriter: store events mirrored into `tracing`.
//!
//! A predefined listener that logs every [`StoreEvent`] it receives at `info` level
//! (ticks at `trace`). Use it for demos and debugging.
//!
//! ## Example output
//! ```text
//! INFO appcore::store: [job-added] id="j1" status="pending"
//! INFO appcore::store: [job-updated] id="j1" status="processing" previous="pending"
//! INFO appcore::store: [changed] path="jobs.j1"
//! INFO appcore::store: [spinner-shown]
//! INFO appcore::store: [cleanup]
//! ```

use tracing::{info, trace};

use crate::error::EventError;
use crate::listeners::{Listener, Subscription};
use crate::state::{channels, StateStore, StoreEvent};

/// Store event writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Listener writing each event once.
    pub fn listener(self) -> Listener<StoreEvent> {
        Listener::new(move |e: &StoreEvent| {
            self.write(e);
            Ok(())
        })
    }

    /// Subscribes one listener to every fixed store channel.
    pub fn attach(self, store: &StateStore) -> Result<Vec<Subscription>, EventError> {
        let listener = self.listener();
        channels::ALL
            .iter()
            .map(|channel| store.on(channel, listener.clone()))
            .collect()
    }

    fn write(&self, e: &StoreEvent) {
        match e {
            StoreEvent::Changed { path, .. } => {
                info!(target: "appcore::store", "[changed] path={path:?}");
            }
            StoreEvent::JobAdded { id, job } => {
                info!(target: "appcore::store", "[job-added] id={id:?} status={:?}", job.status.as_str());
            }
            StoreEvent::JobUpdated { id, job, previous } => {
                info!(
                    target: "appcore::store",
                    "[job-updated] id={id:?} status={:?} previous={:?}",
                    job.status.as_str(),
                    previous.status.as_str()
                );
            }
            StoreEvent::JobRemoved { id, .. } => {
                info!(target: "appcore::store", "[job-removed] id={id:?}");
            }
            StoreEvent::JobsChanged { ids } => {
                info!(target: "appcore::store", "[jobs-changed] count={}", ids.len());
            }
            StoreEvent::CohortAdded { id, cohort } => {
                info!(target: "appcore::store", "[cohort-added] id={id:?} alias={:?}", cohort.alias);
            }
            StoreEvent::CohortUpdated { id, cohort } => {
                info!(
                    target: "appcore::store",
                    "[cohort-updated] id={id:?} jobs={}",
                    cohort.job_ids.len()
                );
            }
            StoreEvent::CohortRemoved { id, .. } => {
                info!(target: "appcore::store", "[cohort-removed] id={id:?}");
            }
            StoreEvent::CohortsChanged { ids } => {
                info!(target: "appcore::store", "[cohorts-changed] count={}", ids.len());
            }
            StoreEvent::CountdownStarted { job_id, time_left } => {
                info!(target: "appcore::store", "[countdown-started] job={job_id:?} time_left={time_left}");
            }
            StoreEvent::CountdownTick { time_left, .. } => {
                trace!(target: "appcore::store", "[countdown-tick] time_left={time_left}");
            }
            StoreEvent::CountdownCleared => {
                info!(target: "appcore::store", "[countdown-cleared]");
            }
            StoreEvent::SpinnerShown => info!(target: "appcore::store", "[spinner-shown]"),
            StoreEvent::SpinnerHidden => info!(target: "appcore::store", "[spinner-hidden]"),
            StoreEvent::Cleanup => info!(target: "appcore::store", "[cleanup]"),
            StoreEvent::Custom(value) => {
                info!(target: "appcore::store", "[custom] payload={value}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobPatch;

    #[test]
    fn attach_covers_every_channel_once() {
        let store = StateStore::default();
        let subs = LogWriter::new().attach(&store).unwrap();
        assert_eq!(subs.len(), channels::ALL.len());
        assert_eq!(store.listener_count(channels::JOB_ADDED), 1);

        store.add_job("j1", JobPatch::default());
        subs.iter().for_each(Subscription::unsubscribe);
        assert_eq!(store.listener_count(channels::JOB_ADDED), 0);
    }
}

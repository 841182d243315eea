//! # Notifications published by the state store.
//!
//! Every [`StoreEvent`] is delivered on a named channel. Exact-path listeners use the
//! dot path itself as the channel name (`"jobs.j1.status"`); everything else uses one
//! of the names in [`channels`].

use serde_json::Value;

use crate::state::model::{CohortRecord, JobRecord};

/// Fixed channel names.
pub mod channels {
    /// Every effective path mutation.
    pub const CHANGE: &str = "change";
    pub const JOB_ADDED: &str = "job:added";
    pub const JOB_UPDATED: &str = "job:updated";
    pub const JOB_REMOVED: &str = "job:removed";
    pub const JOBS_CHANGED: &str = "jobs:changed";
    pub const COHORT_ADDED: &str = "cohort:added";
    pub const COHORT_UPDATED: &str = "cohort:updated";
    pub const COHORT_REMOVED: &str = "cohort:removed";
    pub const COHORTS_CHANGED: &str = "cohorts:changed";
    pub const COUNTDOWN_STARTED: &str = "countdown:started";
    pub const COUNTDOWN_TICK: &str = "countdown:tick";
    pub const COUNTDOWN_CLEARED: &str = "countdown:cleared";
    pub const SPINNER_SHOWN: &str = "spinner:shown";
    pub const SPINNER_HIDDEN: &str = "spinner:hidden";
    pub const CLEANUP: &str = "state:cleanup";

    /// All fixed channels, in lifecycle order.
    pub const ALL: &[&str] = &[
        CHANGE,
        JOB_ADDED,
        JOB_UPDATED,
        JOB_REMOVED,
        JOBS_CHANGED,
        COHORT_ADDED,
        COHORT_UPDATED,
        COHORT_REMOVED,
        COHORTS_CHANGED,
        COUNTDOWN_STARTED,
        COUNTDOWN_TICK,
        COUNTDOWN_CLEARED,
        SPINNER_SHOWN,
        SPINNER_HIDDEN,
        CLEANUP,
    ];
}

/// Payload delivered to store listeners.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A path changed value. Sent on the path's own channel, then on `"change"`.
    Changed {
        path: String,
        value: Value,
        /// `None` when the path did not exist before.
        old_value: Option<Value>,
    },
    JobAdded {
        id: String,
        job: JobRecord,
    },
    JobUpdated {
        id: String,
        job: JobRecord,
        previous: JobRecord,
    },
    JobRemoved {
        id: String,
        job: JobRecord,
    },
    /// Job ids after any job add/update/remove.
    JobsChanged {
        ids: Vec<String>,
    },
    CohortAdded {
        id: String,
        cohort: CohortRecord,
    },
    CohortUpdated {
        id: String,
        cohort: CohortRecord,
    },
    CohortRemoved {
        id: String,
        cohort: CohortRecord,
    },
    /// Cohort ids after any cohort add/update/remove.
    CohortsChanged {
        ids: Vec<String>,
    },
    CountdownStarted {
        job_id: Option<String>,
        time_left: u32,
    },
    CountdownTick {
        job_id: Option<String>,
        time_left: u32,
    },
    CountdownCleared,
    SpinnerShown,
    SpinnerHidden,
    Cleanup,
    /// Application-defined payload sent through [`StateStore::emit`](crate::StateStore::emit).
    Custom(Value),
}

impl StoreEvent {
    /// Short stable name used in store history and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::Changed { .. } => "changed",
            StoreEvent::JobAdded { .. } => "job_added",
            StoreEvent::JobUpdated { .. } => "job_updated",
            StoreEvent::JobRemoved { .. } => "job_removed",
            StoreEvent::JobsChanged { .. } => "jobs_changed",
            StoreEvent::CohortAdded { .. } => "cohort_added",
            StoreEvent::CohortUpdated { .. } => "cohort_updated",
            StoreEvent::CohortRemoved { .. } => "cohort_removed",
            StoreEvent::CohortsChanged { .. } => "cohorts_changed",
            StoreEvent::CountdownStarted { .. } => "countdown_started",
            StoreEvent::CountdownTick { .. } => "countdown_tick",
            StoreEvent::CountdownCleared => "countdown_cleared",
            StoreEvent::SpinnerShown => "spinner_shown",
            StoreEvent::SpinnerHidden => "spinner_hidden",
            StoreEvent::Cleanup => "cleanup",
            StoreEvent::Custom(_) => "custom",
        }
    }
}

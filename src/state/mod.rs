//! # Reactive state store.
//!
//! [`StateStore`] holds the application [`AppState`] and notifies listeners after every
//! committed change. Listeners subscribe either to an exact dot path or to one of the
//! fixed [`channels`].
//!
//! ## Example
//! ```rust
//! use appcore::state::{channels, JobPatch, JobStatus, StateStore, StoreEvent};
//! use appcore::Listener;
//!
//! let store = StateStore::default();
//! store.on(channels::JOB_UPDATED, Listener::new(|e: &StoreEvent| {
//!     if let StoreEvent::JobUpdated { id, job, .. } = e {
//!         println!("{id} is now {}", job.status.as_str());
//!     }
//!     Ok(())
//! })).unwrap();
//!
//! store.add_job("j1", JobPatch::default().with_file_name("sample.bam"));
//! store.update_job_status("j1", JobStatus::Processing);
//! assert_eq!(store.get("jobs.j1.status"), Some(serde_json::json!("processing")));
//! ```

mod event;
mod jobs;
mod model;
mod path;
mod store;
mod timers;

pub use event::{channels, StoreEvent};
pub use model::{
    AppState, CohortRecord, Countdown, FileRef, JobPatch, JobRecord, JobStatus, Spinner,
};
pub use store::{PollStop, StateRecord, StateStore};

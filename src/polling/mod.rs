//! # Polling orchestrator.
//!
//! Named, deduplicated, cancellable poll loops with capped exponential backoff.
//!
//! - [`Poller`] registry of loops keyed by id
//! - [`PollOptions`] interval / retry / duration policy and callbacks of one loop
//! - [`Probe`] / [`ProbeFn`] the status check performed each cycle
//! - [`ProbeOutcome`] how a result reports a terminal status
//! - [`PollHandle`] cancels one loop

mod actor;
mod options;
mod poller;
mod probe;

pub use options::PollOptions;
pub use poller::{LoopStatus, PollHandle, PollInfo, Poller};
pub use probe::{Probe, ProbeFn, ProbeOutcome, ProbeRef, TERMINAL_STATUSES};

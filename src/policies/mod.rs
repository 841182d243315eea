//! Retry timing policies for poll loops.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays grow after failed probes (factor / cap + jitter)
//! - [`JitterPolicy`]  randomization of retry delays to spread synchronized pollers
//!
//! ## Quick wiring
//! ```text
//! PollOptions { interval, max_retries, max_duration, backoff: BackoffPolicy, .. }
//!      └─► polling::actor::PollActor uses:
//!           - interval after every non-terminal success
//!           - backoff.delay(interval, retries) after every failed probe
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → factor=2.0, max=60s, jitter=None.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;

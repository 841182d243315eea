//! # Probe abstraction and function-backed probe.
//!
//! A [`Probe`] performs one status check for a poll loop (typically an HTTP request for a
//! job's status). [`ProbeFn`] wraps a closure that creates a fresh future per call, so
//! no state leaks between cycles unless the closure shares it explicitly through `Arc`.
//!
//! Probe results expose their lifecycle through [`ProbeOutcome`]; a loop stops on the
//! first terminal outcome.
//!
//! ## Example
//! ```rust
//! use appcore::{ProbeError, ProbeFn, ProbeRef};
//! use serde_json::{json, Value};
//!
//! let probe: ProbeRef<Value> = ProbeFn::arc(|| async {
//!     Ok::<_, ProbeError>(json!({ "status": "processing", "progress": 40 }))
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProbeError;

/// Status values that end a poll loop.
pub const TERMINAL_STATUSES: &[&str] = &["completed", "failed"];

/// # One asynchronous status check.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use appcore::{Probe, ProbeError};
/// use serde_json::{json, Value};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl Probe<Value> for Fixed {
///     async fn probe(&self) -> Result<Value, ProbeError> {
///         Ok(json!({ "status": "completed" }))
///     }
/// }
/// ```
#[async_trait]
pub trait Probe<R: Send + 'static>: Send + Sync + 'static {
    /// Performs the check. Errors are routed to the loop's `on_error` and retried.
    async fn probe(&self) -> Result<R, ProbeError>;
}

/// Shared handle to a probe.
pub type ProbeRef<R> = Arc<dyn Probe<R>>;

/// Function-backed probe.
pub struct ProbeFn<F> {
    f: F,
}

impl<F> ProbeFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the probe and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut, R> Probe<R> for ProbeFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ProbeError>> + Send + 'static,
    R: Send + 'static,
{
    async fn probe(&self) -> Result<R, ProbeError> {
        (self.f)().await
    }
}

impl<F> std::fmt::Debug for ProbeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeFn").finish_non_exhaustive()
    }
}

/// Lifecycle view of a probe result.
pub trait ProbeOutcome {
    /// Reported status, if the result carries one.
    fn status(&self) -> Option<&str>;

    /// `true` when the status is `completed` or `failed`.
    fn is_terminal(&self) -> bool {
        self.status()
            .is_some_and(|s| TERMINAL_STATUSES.contains(&s))
    }
}

/// Reads the top-level `"status"` string.
impl ProbeOutcome for Value {
    fn status(&self) -> Option<&str> {
        self.get("status").and_then(Value::as_str)
    }
}

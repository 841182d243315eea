//! Error types used by the runtime core.
//!
//! This module defines one error enum per component:
//!
//! - [`ContainerError`]: registration and resolution failures of the dependency container.
//! - [`EventError`]: subscription-time validation failures of the event bus and the store.
//! - [`StateError`]: path addressing and entity lookup failures of the state store.
//! - [`PollError`]: failures surfaced to `on_error` by the polling orchestrator.
//!
//! All types provide `as_label` (stable snake_case) for logs/metrics.
//! Container and bus errors are returned synchronously to the caller; poll errors are
//! never returned, only delivered to callbacks.

use std::time::Duration;
use thiserror::Error;

/// Error returned by user probes; any error type converts into it with `?`.
pub type ProbeError = anyhow::Error;

/// # Errors produced by the dependency container.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// Token is already registered and `override_` was not set.
    #[error("dependency '{token}' is already registered")]
    DuplicateRegistration {
        /// The conflicting token.
        token: String,
    },

    /// Registration was flagged as a factory but the provider is a plain value.
    #[error("dependency '{token}' is flagged as a factory but no factory function was given")]
    InvalidFactory {
        /// The offending token.
        token: String,
    },

    /// Nothing is registered under the token.
    #[error("dependency '{token}' is not registered")]
    NotFound {
        /// The missing token.
        token: String,
    },

    /// The token is already on the active resolution path.
    #[error("circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency {
        /// Resolution path in order, ending with the repeated token.
        chain: Vec<String>,
    },

    /// The resolved instance is not of the requested type.
    #[error("dependency '{token}' is not a {expected}")]
    TypeMismatch {
        /// The resolved token.
        token: String,
        /// Requested type name.
        expected: &'static str,
    },

    /// A factory or an injectable constructor returned an error.
    #[error("factory for '{token}' failed: {reason}")]
    FactoryFailed {
        /// Token whose factory failed.
        token: String,
        /// Underlying failure message.
        reason: String,
    },
}

impl ContainerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use appcore::ContainerError;
    ///
    /// let err = ContainerError::NotFound { token: "api".into() };
    /// assert_eq!(err.as_label(), "container_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ContainerError::DuplicateRegistration { .. } => "container_duplicate_registration",
            ContainerError::InvalidFactory { .. } => "container_invalid_factory",
            ContainerError::NotFound { .. } => "container_not_found",
            ContainerError::CircularDependency { .. } => "container_circular_dependency",
            ContainerError::TypeMismatch { .. } => "container_type_mismatch",
            ContainerError::FactoryFailed { .. } => "container_factory_failed",
        }
    }
}

/// # Errors produced when subscribing to an event channel.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Event name is empty or whitespace only.
    #[error("invalid event name {name:?}: must be a non-empty string")]
    InvalidEventName {
        /// The rejected name.
        name: String,
    },
}

impl EventError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventError::InvalidEventName { .. } => "event_invalid_name",
        }
    }
}

/// # Errors produced by the reactive state store.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Path is empty, has an empty segment, or addresses an unknown region.
    #[error("invalid state path '{path}'")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// The value does not fit the typed state tree at this path.
    #[error("invalid value for '{path}': {reason}")]
    InvalidValue {
        /// Path that was being set.
        path: String,
        /// Deserialization failure message.
        reason: String,
    },

    /// No job with this id.
    #[error("job '{id}' not found")]
    JobNotFound {
        /// Missing job id.
        id: String,
    },

    /// No cohort with this id.
    #[error("cohort '{id}' not found")]
    CohortNotFound {
        /// Missing cohort id.
        id: String,
    },
}

impl StateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StateError::InvalidPath { .. } => "state_invalid_path",
            StateError::InvalidValue { .. } => "state_invalid_value",
            StateError::JobNotFound { .. } => "state_job_not_found",
            StateError::CohortNotFound { .. } => "state_cohort_not_found",
        }
    }
}

/// # Errors delivered to a poll loop's `on_error` callback.
///
/// These are never returned from [`Poller`](crate::Poller) methods.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PollError {
    /// The loop ran longer than its configured `max_duration`.
    #[error("polling exceeded maximum duration of {max:?} (elapsed {elapsed:?})")]
    DurationExceeded {
        /// Configured ceiling.
        max: Duration,
        /// Wall-clock time since the loop started.
        elapsed: Duration,
    },

    /// The probe returned an error for this cycle.
    #[error("probe failed (retry {retries}): {source}")]
    ProbeFailed {
        /// Retry counter at the time of failure.
        retries: u32,
        /// The probe's error.
        #[source]
        source: ProbeError,
    },

    /// The probe panicked during this cycle.
    #[error("probe panicked (retry {retries}): {info}")]
    ProbePanicked {
        /// Retry counter at the time of failure.
        retries: u32,
        /// Panic payload rendered as text.
        info: String,
    },
}

impl PollError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use appcore::PollError;
    /// use std::time::Duration;
    ///
    /// let err = PollError::DurationExceeded { max: Duration::from_secs(1), elapsed: Duration::from_secs(2) };
    /// assert_eq!(err.as_label(), "poll_duration_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            PollError::DurationExceeded { .. } => "poll_duration_exceeded",
            PollError::ProbeFailed { .. } => "poll_probe_failed",
            PollError::ProbePanicked { .. } => "poll_probe_panicked",
        }
    }

    /// Indicates whether the loop may retry after this error.
    ///
    /// Returns `false` only for [`PollError::DurationExceeded`], which is terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PollError::DurationExceeded { .. })
    }
}

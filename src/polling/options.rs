//! # Per-loop polling options.
//!
//! [`PollOptions`] bundles the timing policy of one loop with its callbacks. It can be
//! created:
//! - **Explicitly** with [`PollOptions::new`] (built-in defaults: 5s / 10 retries / 1h)
//! - **From config** with [`PollOptions::with_defaults`]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::Config;
use crate::error::PollError;
use crate::policies::BackoffPolicy;

pub(crate) type ResultCallback<R> = Arc<dyn Fn(&R) + Send + Sync>;
pub(crate) type ErrorCallback = Arc<dyn Fn(&PollError) + Send + Sync>;

/// Timing policy and callbacks of one poll loop.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use appcore::{Config, PollOptions};
/// use serde_json::Value;
///
/// let opts = PollOptions::<Value>::with_defaults(&Config::default())
///     .interval(Duration::from_secs(2))
///     .max_retries(3)
///     .on_update(|v| println!("status: {}", v["status"]))
///     .on_error(|e| eprintln!("poll error: {e}"));
/// assert_eq!(opts.interval, Duration::from_secs(2));
/// ```
pub struct PollOptions<R> {
    /// Delay after every non-terminal successful probe.
    pub interval: Duration,
    /// Failed probes tolerated before the loop gives up.
    pub max_retries: u32,
    /// Wall-clock ceiling of the loop (`None` = unlimited).
    pub max_duration: Option<Duration>,
    /// Growth of the delay after consecutive failures, based on `interval`.
    pub backoff: BackoffPolicy,
    pub(crate) on_update: Option<ResultCallback<R>>,
    pub(crate) on_complete: Option<ResultCallback<R>>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl<R> PollOptions<R> {
    /// Options with the built-in defaults and no callbacks.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 10,
            max_duration: Some(Duration::from_secs(3600)),
            backoff: BackoffPolicy::default(),
            on_update: None,
            on_complete: None,
            on_error: None,
        }
    }

    /// Options inheriting the poll defaults of `cfg`.
    pub fn with_defaults(cfg: &Config) -> Self {
        Self {
            interval: cfg.poll_interval,
            max_retries: cfg.poll_max_retries,
            max_duration: cfg.max_duration(),
            backoff: BackoffPolicy {
                max: cfg.backoff_cap(),
                jitter: cfg.poll_jitter,
                ..BackoffPolicy::default()
            },
            ..Self::new()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Called with every successful probe result, terminal ones included.
    pub fn on_update(mut self, f: impl Fn(&R) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    /// Called once with the terminal result, after `on_update`.
    pub fn on_complete(mut self, f: impl Fn(&R) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Called with every probe failure and with the duration-exceeded error.
    pub fn on_error(mut self, f: impl Fn(&PollError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl<R> Default for PollOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for PollOptions<R> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            max_retries: self.max_retries,
            max_duration: self.max_duration,
            backoff: self.backoff,
            on_update: self.on_update.clone(),
            on_complete: self.on_complete.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<R> fmt::Debug for PollOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollOptions")
            .field("interval", &self.interval)
            .field("max_retries", &self.max_retries)
            .field("max_duration", &self.max_duration)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;

    #[test]
    fn defaults_match_config_defaults() {
        let from_cfg = PollOptions::<()>::with_defaults(&Config::default());
        let built_in = PollOptions::<()>::new();
        assert_eq!(from_cfg.interval, built_in.interval);
        assert_eq!(from_cfg.max_retries, built_in.max_retries);
        assert_eq!(from_cfg.max_duration, built_in.max_duration);
        assert_eq!(from_cfg.backoff, built_in.backoff);
    }

    #[test]
    fn zero_sentinels_disable_limits() {
        let cfg = Config {
            poll_max_duration: Duration::ZERO,
            poll_backoff_cap: Duration::ZERO,
            poll_jitter: JitterPolicy::Full,
            ..Config::default()
        };
        let opts = PollOptions::<()>::with_defaults(&cfg);
        assert_eq!(opts.max_duration, None);
        assert_eq!(opts.backoff.max, None);
        assert_eq!(opts.backoff.jitter, JitterPolicy::Full);
    }
}

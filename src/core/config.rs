//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the runtime core.
//!
//! Config is used in two ways:
//! 1. **Runtime creation**: `Runtime::builder(config).build()`
//! 2. **Poll defaults**: `PollOptions::with_defaults(&config)`
//!
//! ## Sentinel values
//! - `history_capacity = 0` → clamped to 1 by the history buffers
//! - `poll_max_duration = 0s` → no wall-clock ceiling
//! - `poll_backoff_cap = 0s` → no backoff cap

use std::time::Duration;

use crate::policies::JitterPolicy;

/// Global configuration for the runtime core.
///
/// Defines:
/// - **Diagnostics**: history ring buffer sizes for the bus and the store
/// - **Countdown**: initial value and tick period
/// - **Polling defaults**: interval, retry limit, duration ceiling, backoff
///
/// ## Notes
/// All fields are public for flexibility. The defaults are policy constants with no
/// load-testing behind them; override them freely.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of emissions kept by the event bus history.
    pub event_history_capacity: usize,

    /// Number of mutations kept by the state store history.
    pub state_history_capacity: usize,

    /// Value the countdown starts from and wraps back to.
    pub countdown_initial: u32,

    /// Period between countdown ticks.
    pub countdown_tick: Duration,

    /// Default delay between successful poll cycles.
    pub poll_interval: Duration,

    /// Default number of retries after failed probes before a loop gives up.
    pub poll_max_retries: u32,

    /// Default wall-clock ceiling of a poll loop (`0s` = unlimited).
    pub poll_max_duration: Duration,

    /// Default cap of the exponential retry delay (`0s` = uncapped).
    pub poll_backoff_cap: Duration,

    /// Default jitter applied to retry delays.
    pub poll_jitter: JitterPolicy,
}

impl Config {
    /// Returns the default poll duration ceiling as an `Option`.
    ///
    /// - `None` → loops may run forever
    /// - `Some(d)` → loops stop once `d` has elapsed
    #[inline]
    pub fn max_duration(&self) -> Option<Duration> {
        if self.poll_max_duration == Duration::ZERO {
            None
        } else {
            Some(self.poll_max_duration)
        }
    }

    /// Returns the default backoff cap as an `Option`.
    #[inline]
    pub fn backoff_cap(&self) -> Option<Duration> {
        if self.poll_backoff_cap == Duration::ZERO {
            None
        } else {
            Some(self.poll_backoff_cap)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `event_history_capacity = 100`, `state_history_capacity = 100`
    /// - `countdown_initial = 20`, `countdown_tick = 1s`
    /// - `poll_interval = 5s`, `poll_max_retries = 10`, `poll_max_duration = 1h`
    /// - `poll_backoff_cap = 60s`, `poll_jitter = JitterPolicy::None`
    fn default() -> Self {
        Self {
            event_history_capacity: 100,
            state_history_capacity: 100,
            countdown_initial: 20,
            countdown_tick: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            poll_max_retries: 10,
            poll_max_duration: Duration::from_secs(60 * 60),
            poll_backoff_cap: Duration::from_secs(60),
            poll_jitter: JitterPolicy::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels_disable_limits() {
        let cfg = Config {
            poll_max_duration: Duration::ZERO,
            poll_backoff_cap: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.max_duration(), None);
        assert_eq!(cfg.backoff_cap(), None);
        assert_eq!(
            Config::default().max_duration(),
            Some(Duration::from_secs(3600))
        );
    }
}

//! # Backoff policy for failed probes.
//!
//! [`BackoffPolicy`] controls how the delay before the next probe grows after
//! consecutive failures. It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the optional delay ceiling;
//! - [`BackoffPolicy::jitter`] randomization applied after clamping.
//!
//! The base of the sequence is the loop's own interval: the delay after the `n`-th
//! consecutive failure is `interval × factor^n`, clamped to `max`. The base is derived
//! from the retry count alone, so jitter output never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use appcore::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     factor: 2.0,
//!     max: Some(Duration::from_secs(60)),
//!     jitter: JitterPolicy::None,
//! };
//! let interval = Duration::from_millis(1000);
//!
//! assert_eq!(backoff.delay(interval, 1), Duration::from_millis(2000));
//! assert_eq!(backoff.delay(interval, 2), Duration::from_millis(4000));
//! // 1s × 2^10 = 1024s → capped at 60s
//! assert_eq!(backoff.delay(interval, 10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Delay ceiling (`None` = uncapped).
    pub max: Option<Duration>,
    /// Jitter applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `factor = 2.0` (doubling);
    /// - `max = 60s`;
    /// - `jitter = None`.
    fn default() -> Self {
        Self {
            factor: 2.0,
            max: Some(Duration::from_secs(60)),
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay after `retries` consecutive failures of a loop polling every `base`.
    ///
    /// # Notes
    /// - `retries = 0` yields `base` itself (clamped).
    /// - Overflowing or non-finite intermediate values clamp to `max`, or to `Duration::MAX`
    ///   when uncapped.
    pub fn delay(&self, base: Duration, retries: u32) -> Duration {
        let exp = retries.min(i32::MAX as u32) as i32;
        let secs = base.as_secs_f64() * self.factor.powi(exp);
        let ceiling = self.max.unwrap_or(Duration::MAX);

        let clamped = if !secs.is_finite() || secs < 0.0 || secs > ceiling.as_secs_f64() {
            ceiling
        } else {
            Duration::try_from_secs_f64(secs).unwrap_or(ceiling).min(ceiling)
        };
        self.jitter.apply(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling(max: Option<Duration>) -> BackoffPolicy {
        BackoffPolicy {
            factor: 2.0,
            max,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_zero_retries_returns_base() {
        let policy = doubling(Some(Duration::from_secs(60)));
        assert_eq!(
            policy.delay(Duration::from_millis(500), 0),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_exponential_growth() {
        let policy = doubling(Some(Duration::from_secs(60)));
        let base = Duration::from_millis(1000);
        assert_eq!(policy.delay(base, 1), Duration::from_millis(2000));
        assert_eq!(policy.delay(base, 2), Duration::from_millis(4000));
        assert_eq!(policy.delay(base, 3), Duration::from_millis(8000));
        assert_eq!(policy.delay(base, 5), Duration::from_millis(32000));
    }

    #[test]
    fn test_capped_at_sixty_seconds() {
        let policy = doubling(Some(Duration::from_secs(60)));
        let base = Duration::from_millis(5000);
        assert_eq!(policy.delay(base, 4), Duration::from_secs(60));
        assert_eq!(policy.delay(base, 30), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_retry_count_clamps() {
        let policy = doubling(Some(Duration::from_secs(10)));
        assert_eq!(
            policy.delay(Duration::from_millis(100), u32::MAX),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_uncapped_overflow_saturates() {
        let policy = doubling(None);
        assert_eq!(
            policy.delay(Duration::from_secs(1), u32::MAX),
            Duration::MAX
        );
    }

    #[test]
    fn test_equal_jitter_keeps_half() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..doubling(Some(Duration::from_secs(60)))
        };
        for retries in 0..8 {
            let base_ms = (1000.0 * 2.0f64.powi(retries as i32)).min(60_000.0);
            let d = policy.delay(Duration::from_millis(1000), retries);
            assert!(d >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(d <= Duration::from_millis(base_ms as u64));
        }
    }
}

//! # Retry delay for the periodic keep loop.
//!
//! While keep passes fail (spawn errors), the next pass comes sooner than the regular
//! interval: `first × factor^failures`, capped at `max`, then jittered. A clean pass
//! resets the failure count.
//!
//! ```rust
//! use std::time::Duration;
//! use queuevisor::manage::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(30),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(3), Duration::from_secs(8));
//! assert_eq!(backoff.next(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

use rand::Rng;

/// Randomization of retry delays, so several supervisors do not retry in lockstep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay/2 + uniform[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    /// Applies the jitter to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + extra)
            }
        }
    }
}

/// Exponential retry delay.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failed pass.
    pub first: Duration,
    /// Upper bound.
    pub max: Duration,
    /// Growth per consecutive failure.
    pub factor: f64,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// 1 s doubling up to 60 s, equal jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Delay after `failures` consecutive failed passes (0-indexed).
    ///
    /// Each call derives its base from `failures` alone; jitter never feeds back.
    pub fn next(&self, failures: u32) -> Duration {
        let exp = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_capped() {
        let p = policy(JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(4), Duration::from_millis(1600));
        assert_eq!(p.next(20), Duration::from_secs(5));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_first_above_max_is_capped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(10),
            ..policy(JitterPolicy::None)
        };
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let full = policy(JitterPolicy::Full);
        let equal = policy(JitterPolicy::Equal);
        for failures in 0..12 {
            let base = policy(JitterPolicy::None).next(failures);
            assert!(full.next(failures) <= base);
            let d = equal.next(failures);
            assert!(d >= base / 2 && d <= base, "failures {failures}: {d:?} vs {base:?}");
        }
    }
}

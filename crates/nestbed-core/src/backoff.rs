use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NestbedError, Result};

/// Largest accepted growth factor between two attempts.
pub const MAX_MULTIPLIER: f64 = 10.0;

/// Exponential backoff with jitter, used while waiting for a database to accept connections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// First wait between attempts (unit: milliseconds)
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Growth factor applied to the base interval after every attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound of the random extra wait, as a fraction of the base interval
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// Maximum wait between two attempts (unit: milliseconds)
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Total wait budget (unit: milliseconds, 0 means wait until cancelled)
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
            max_interval_ms: default_max_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    1.5
}
fn default_randomization_factor() -> f64 {
    0.5
}
fn default_max_interval_ms() -> u64 {
    60_000
}
fn default_max_elapsed_ms() -> u64 {
    15 * 60 * 1000
}

impl BackoffPolicy {
    /// Reject growth and jitter values that cannot describe a sane retry loop.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || !(1.0..=MAX_MULTIPLIER).contains(&self.multiplier) {
            return Err(NestbedError::Config(format!(
                "backoff multiplier must be between 1 and {MAX_MULTIPLIER}, got {}",
                self.multiplier
            )));
        }
        if !self.randomization_factor.is_finite()
            || !(0.0..=1.0).contains(&self.randomization_factor)
        {
            return Err(NestbedError::Config(format!(
                "backoff randomization_factor must be between 0 and 1, got {}",
                self.randomization_factor
            )));
        }
        if self.initial_interval_ms > self.max_interval_ms {
            return Err(NestbedError::Config(format!(
                "backoff initial_interval_ms ({}) exceeds max_interval_ms ({})",
                self.initial_interval_ms, self.max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        match self.max_elapsed_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Stateful delay generator for one retry loop.
///
/// Delays never shrink from one attempt to the next: the jitter added on top of
/// the base interval is capped at `multiplier - 1`, so the next base interval is
/// always at least as long as the current jittered delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_interval: Duration,
    multiplier: f64,
    randomization: f64,
}

impl ExponentialBackoff {
    pub fn new(policy: &BackoffPolicy) -> Self {
        let multiplier = if policy.multiplier.is_finite() {
            policy.multiplier.max(1.0)
        } else {
            1.0
        };
        let randomization = if policy.randomization_factor.is_finite() {
            policy.randomization_factor.clamp(0.0, multiplier - 1.0)
        } else {
            0.0
        };
        let max_interval = Duration::from_millis(policy.max_interval_ms);
        Self {
            base: Duration::from_millis(policy.initial_interval_ms).min(max_interval),
            max_interval,
            multiplier,
            randomization,
        }
    }

    /// Wait before the next attempt; advances the base interval.
    pub fn next_delay(&mut self) -> Duration {
        let factor = if self.randomization > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.randomization)
        } else {
            0.0
        };
        let delay = scale(self.base, 1.0 + factor, self.max_interval);
        self.base = scale(self.base, self.multiplier, self.max_interval);
        delay
    }
}

/// `duration * factor`, saturating at `cap` instead of overflowing.
fn scale(duration: Duration, factor: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).map_or(cap, |d| d.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_never_decrease() {
        let policy = BackoffPolicy {
            initial_interval_ms: 10,
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval_ms: 400,
            max_elapsed_ms: 0,
        };
        let mut backoff = ExponentialBackoff::new(&policy);
        let delays: Vec<Duration> = (0..30).map(|_| backoff.next_delay()).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "backoff shrank: {delays:?}");
        }
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(400));
    }

    #[test]
    fn first_delay_within_jitter_window() {
        let policy = BackoffPolicy {
            initial_interval_ms: 100,
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_interval_ms: 10_000,
            max_elapsed_ms: 0,
        };
        let mut backoff = ExponentialBackoff::new(&policy);
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(150));
    }

    #[test]
    fn oversized_jitter_is_clamped_to_growth() {
        let policy = BackoffPolicy {
            initial_interval_ms: 100,
            multiplier: 1.2,
            randomization_factor: 3.0,
            max_interval_ms: 10_000,
            max_elapsed_ms: 0,
        };
        let mut backoff = ExponentialBackoff::new(&policy);
        let first = backoff.next_delay();
        assert!(first <= Duration::from_millis(120));
    }

    #[test]
    fn huge_multiplier_saturates_at_max_interval() {
        let policy = BackoffPolicy {
            initial_interval_ms: 500,
            multiplier: 1e30,
            randomization_factor: 0.5,
            max_interval_ms: 60_000,
            max_elapsed_ms: 0,
        };
        let mut backoff = ExponentialBackoff::new(&policy);
        backoff.next_delay();
        for _ in 0..3 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(60_000));
        }
    }

    #[test]
    fn unbounded_interval_does_not_overflow() {
        let policy = BackoffPolicy {
            initial_interval_ms: 1,
            multiplier: 10.0,
            randomization_factor: 1.0,
            max_interval_ms: u64::MAX,
            max_elapsed_ms: 0,
        };
        let mut backoff = ExponentialBackoff::new(&policy);
        for _ in 0..400 {
            backoff.next_delay();
        }
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert!(BackoffPolicy::default().validate().is_ok());

        let mut policy = BackoffPolicy::default();
        policy.multiplier = 1e30;
        assert!(policy.validate().is_err());
        policy.multiplier = 0.5;
        assert!(policy.validate().is_err());
        policy.multiplier = f64::NAN;
        assert!(policy.validate().is_err());

        let mut policy = BackoffPolicy::default();
        policy.randomization_factor = 2.0;
        assert!(policy.validate().is_err());
        policy.randomization_factor = -0.1;
        assert!(policy.validate().is_err());

        let mut policy = BackoffPolicy::default();
        policy.initial_interval_ms = policy.max_interval_ms + 1;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn zero_max_elapsed_means_unbounded() {
        let mut policy = BackoffPolicy::default();
        assert_eq!(policy.max_elapsed(), Some(Duration::from_secs(900)));
        policy.max_elapsed_ms = 0;
        assert_eq!(policy.max_elapsed(), None);
    }
}

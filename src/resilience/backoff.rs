//! Delay computation between retry attempts.

use rand::Rng;
use std::time::Duration;

use crate::config;

pub use crate::config::RetryBackoff as BackoffStrategy;

/// Backoff parameters
///
/// Pure: the only input besides the attempt number is the random source,
/// so a seeded RNG makes every delay reproducible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Lower bound on every computed delay, jitter included
    pub min_delay: Duration,
    /// Upper bound on every computed delay, jitter included
    pub max_delay: Duration,
    /// Growth factor for exponential backoff, at least 1.0
    pub multiplier: f64,
    /// Relative spread of the random jitter, 0.0 to 1.0
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay,
            min_delay: Duration::ZERO,
            max_delay,
            multiplier,
            jitter_ratio: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Delay before retrying after `attempt` failed, without jitter
    ///
    /// `attempt` is 1-indexed; 0 is treated as 1.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        let base = self.base_delay.as_nanos() as f64;
        if base == 0.0 {
            return self.clamp_nanos(0.0);
        }

        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                let multiplier = if self.multiplier.is_finite() {
                    self.multiplier.max(1.0)
                } else {
                    1.0
                };
                // Saturates to infinity for huge exponents; clamped below.
                base * multiplier.powi((n - 1).min(i32::MAX as u32) as i32)
            }
            BackoffStrategy::Linear => base * n as f64,
            BackoffStrategy::Constant => base,
        };

        self.clamp_nanos(raw)
    }

    /// Delay before retrying after `attempt` failed, using the thread RNG
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        self.compute_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Delay before retrying after `attempt` failed, drawing jitter from `rng`
    ///
    /// The result is always within `[min_delay, max_delay]`.
    pub fn compute_delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay_for(attempt);
        let ratio = if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if ratio == 0.0 || delay.is_zero() {
            return delay;
        }

        let spread: f64 = rng.gen_range(-1.0..=1.0);
        self.clamp_nanos(delay.as_nanos() as f64 * (1.0 + ratio * spread))
    }

    /// A floor above the cap yields to the cap
    fn clamp_nanos(&self, nanos: f64) -> Duration {
        let min = self.min_delay.min(self.max_delay);
        let max = self.max_delay.as_nanos() as f64;
        if nanos.is_nan() || nanos <= min.as_nanos() as f64 {
            min
        } else if nanos >= max {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

impl From<&config::RetryConfig> for BackoffPolicy {
    fn from(config: &config::RetryConfig) -> Self {
        Self {
            strategy: config.backoff,
            base_delay: Duration::from_millis(config.base_delay),
            min_delay: Duration::from_millis(config.min_delay),
            max_delay: Duration::from_millis(config.max_delay),
            multiplier: config.multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }
}

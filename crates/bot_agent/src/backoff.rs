//! Delay policies applied between failed connect attempts.

use std::time::Duration;

/// Decides how long the supervisor waits before the next connect attempt.
pub trait BackoffPolicy: Send {
    /// Delay before retrying after the `attempt`-th consecutive failure (1-based).
    fn next_delay(&mut self, attempt: u32) -> Duration;

    /// Called after a successful connect.
    fn reset(&mut self) {}
}

/// Waits the same interval after every failure.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    interval: Duration,
}

impl FixedBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&mut self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// Doubles the delay on every consecutive failure, up to `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

/// Configuration-level selection of a [`BackoffPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl BackoffStrategy {
    pub fn into_policy(self) -> Box<dyn BackoffPolicy> {
        match self {
            BackoffStrategy::Fixed(interval) => Box::new(FixedBackoff::new(interval)),
            BackoffStrategy::Exponential { base, max } => {
                Box::new(ExponentialBackoff::new(base, max))
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Fixed(Duration::from_secs(10))
    }
}

//! Bounded retry with exponential backoff.
//!
//! Used by connectors for the initial backend connection. Retries are always
//! capped; an unreachable backend is eventually reported, never retried
//! forever.

use std::time::Duration;

/// Retry policy for opening a backend session.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Delay growth factor between attempts.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Start a backoff sequence for one connection.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Backoff state for one connection.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    current_delay: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create the state after the first attempt.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        let current_delay = policy.initial_delay.min(policy.max_delay);
        Self {
            policy,
            current_delay,
            attempt: 1,
        }
    }

    /// Delay before the next attempt, or `None` when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts.max(1) {
            return None;
        }

        let delay = self.current_delay;

        self.attempt += 1;
        let next = self.current_delay.as_secs_f64() * self.policy.multiplier.max(1.0);
        self.current_delay = Duration::from_secs_f64(next.min(self.policy.max_delay.as_secs_f64()));

        Some(delay)
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

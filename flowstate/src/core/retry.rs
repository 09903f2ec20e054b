//! Exponential-backoff retry policy.
//!
//! Waiting is delegated to a [`Sleeper`] so the policy stays free of side
//! effects; the live sleeper lives in `io::clock`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 25,
            max_delay_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FlowError::validation("retry.max_attempts must be > 0"));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(FlowError::validation(
                "retry.backoff_multiplier must be a finite number >= 1.0",
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(FlowError::validation(
                "retry.max_delay_ms must be >= retry.initial_delay_ms",
            ));
        }
        Ok(())
    }

    /// Wait after the `attempt`-th failure (1-indexed):
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);
        if capped.is_nan() || capped <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_millis(capped as u64)
    }

    /// Retry `op` on every error.
    pub fn run<T, E, F>(&self, sleeper: &dyn Sleeper, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_if(sleeper, |_| true, op)
    }

    /// Retry `op` while `retryable` accepts the error; the last error is returned once
    /// attempts run out. `op` receives the 1-indexed attempt number.
    pub fn run_if<T, E, F, P>(&self, sleeper: &dyn Sleeper, retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && retryable(&err) => {
                    sleeper.sleep(self.delay_for(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

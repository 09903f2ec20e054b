//! Circuit breaker bounding automatic repair attempts.
//!
//! `closed` → (`failure_threshold` consecutive failures) → `open` →
//! (`timeout_ms` elapsed) → `half_open` → (`success_threshold` successes) →
//! `closed`. Any failure while half-open reopens the breaker.
//!
//! The machine is pure: callers pass `now` and persist [`BreakerSnapshot`]
//! between invocations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            timeout_ms: 5 * 60 * 1000,
            success_threshold: 1,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(FlowError::validation("breaker.failure_threshold must be > 0"));
        }
        if self.success_threshold == 0 {
            return Err(FlowError::validation("breaker.success_threshold must be > 0"));
        }
        if i64::try_from(self.timeout_ms).is_err() {
            return Err(FlowError::validation("breaker.timeout_ms is too large"));
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.timeout_ms).unwrap_or(i64::MAX))
    }
}

/// Persisted breaker state (`breakers/<name>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_reset_time: Option<DateTime<Utc>>,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_reset_time: None,
        }
    }
}

/// Answer to "may I attempt the guarded operation now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Gate {
    Allowed {
        state: BreakerState,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        retry_after_ms: u64,
    },
}

/// Outcome of [`CircuitBreaker::call`].
#[derive(Debug, PartialEq, Eq)]
pub enum CallError<E> {
    /// The breaker was open; the operation was not invoked.
    Rejected { retry_after_ms: u64 },
    Failed(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    snapshot: BreakerSnapshot,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, snapshot: BreakerSnapshot) -> Self {
        Self { config, snapshot }
    }

    pub fn snapshot(&self) -> &BreakerSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> BreakerSnapshot {
        self.snapshot
    }

    pub fn state(&self) -> BreakerState {
        self.snapshot.state
    }

    /// Gate an attempt. An open breaker whose cooldown has elapsed moves to half-open.
    ///
    /// Half-open admits every `check` until an outcome is recorded: the probe
    /// limit is left to the caller, since the snapshot is shared between
    /// processes that cannot see each other's in-flight attempts.
    pub fn check(&mut self, now: DateTime<Utc>) -> Gate {
        if self.snapshot.state == BreakerState::Open {
            let opened_at = self.snapshot.last_failure_time.unwrap_or(now);
            let reopen_at = opened_at
                .checked_add_signed(self.config.timeout())
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if now < reopen_at {
                let wait = (reopen_at - now).num_milliseconds().max(0);
                return Gate::Rejected {
                    retry_after_ms: u64::try_from(wait).unwrap_or(0),
                };
            }
            self.snapshot.state = BreakerState::HalfOpen;
            self.snapshot.success_count = 0;
        }
        Gate::Allowed {
            state: self.snapshot.state,
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        match self.snapshot.state {
            BreakerState::Closed => self.snapshot.failure_count = 0,
            BreakerState::HalfOpen => {
                self.snapshot.success_count += 1;
                if self.snapshot.success_count >= self.config.success_threshold {
                    self.close(now);
                }
            }
            // A success reported against an open breaker came from an attempt the
            // breaker never allowed; it does not count.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.snapshot.last_failure_time = Some(now);
        match self.snapshot.state {
            BreakerState::Closed => {
                self.snapshot.failure_count += 1;
                if self.snapshot.failure_count >= self.config.failure_threshold {
                    self.snapshot.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                self.snapshot.failure_count += 1;
                self.snapshot.success_count = 0;
                self.snapshot.state = BreakerState::Open;
            }
            BreakerState::Open => self.snapshot.failure_count += 1,
        }
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.close(now);
        self.snapshot.last_failure_time = None;
    }

    /// Run `op` through the breaker, recording its outcome.
    pub fn call<T, E, F>(&mut self, now: DateTime<Utc>, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Gate::Rejected { retry_after_ms } = self.check(now) {
            return Err(CallError::Rejected { retry_after_ms });
        }
        match op() {
            Ok(value) => {
                self.record_success(now);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(now);
                Err(CallError::Failed(err))
            }
        }
    }

    fn close(&mut self, now: DateTime<Utc>) {
        self.snapshot.state = BreakerState::Closed;
        self.snapshot.failure_count = 0;
        self.snapshot.success_count = 0;
        self.snapshot.last_reset_time = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    fn breaker(failures: u32, timeout_ms: u64, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig {
                failure_threshold: failures,
                timeout_ms,
                success_threshold: successes,
            },
            BreakerSnapshot::default(),
        )
    }

    /// Verifies an open breaker rejects without running the operation.
    #[test]
    fn opens_after_threshold_and_rejects_without_invoking() {
        let mut cb = breaker(3, 1_000, 1);
        for _ in 0..3 {
            let result: Result<(), CallError<&str>> = cb.call(t0(), || Err("boom"));
            assert_eq!(result, Err(CallError::Failed("boom")));
        }
        assert_eq!(cb.state(), BreakerState::Open);

        let invoked = Cell::new(false);
        let result: Result<(), CallError<&str>> = cb.call(t0(), || {
            invoked.set(true);
            Ok(())
        });
        assert_eq!(
            result,
            Err(CallError::Rejected {
                retry_after_ms: 1_000
            })
        );
        assert!(!invoked.get());
    }

    #[test]
    fn success_in_closed_resets_consecutive_failures() {
        let mut cb = breaker(2, 1_000, 1);
        cb.record_failure(t0());
        cb.record_success(t0());
        cb.record_failure(t0());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    /// Verifies the cooldown boundary and that half-open needs `success_threshold` successes to close.
    #[test]
    fn cooldown_moves_to_half_open_then_closes_on_success() {
        let mut cb = breaker(1, 1_000, 2);
        cb.record_failure(t0());
        assert_eq!(cb.state(), BreakerState::Open);

        let later = t0() + Duration::milliseconds(400);
        assert_eq!(cb.check(later), Gate::Rejected { retry_after_ms: 600 });

        let after = t0() + Duration::milliseconds(1_000);
        assert_eq!(
            cb.check(after),
            Gate::Allowed {
                state: BreakerState::HalfOpen
            }
        );
        cb.record_success(after);
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success(after);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.snapshot().last_reset_time, Some(after));
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    /// Verifies half-open keeps admitting checks until an outcome arrives.
    #[test]
    fn half_open_admits_repeated_checks() {
        let mut cb = breaker(1, 100, 1);
        cb.record_failure(t0());
        let probe_at = t0() + Duration::milliseconds(100);
        let half_open = Gate::Allowed {
            state: BreakerState::HalfOpen,
        };
        assert_eq!(cb.check(probe_at), half_open);
        assert_eq!(cb.check(probe_at), half_open);
        assert_eq!(cb.snapshot().success_count, 0);
    }

    #[test]
    fn single_failure_in_half_open_reopens() {
        let mut cb = breaker(2, 500, 3);
        cb.record_failure(t0());
        cb.record_failure(t0());
        let probe_at = t0() + Duration::milliseconds(500);
        assert!(matches!(cb.check(probe_at), Gate::Allowed { .. }));
        cb.record_failure(probe_at);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(matches!(
            cb.check(probe_at + Duration::milliseconds(10)),
            Gate::Rejected { .. }
        ));
    }

    #[test]
    fn reset_closes_and_clears() {
        let mut cb = breaker(1, 10_000, 1);
        cb.record_failure(t0());
        cb.reset(t0());
        let expected = BreakerSnapshot {
            last_reset_time: Some(t0()),
            ..BreakerSnapshot::default()
        };
        assert_eq!(cb.snapshot(), &expected);
    }

    #[test]
    fn snapshot_serializes_with_documented_keys() {
        let value = serde_json::to_value(BreakerSnapshot::default()).unwrap();
        assert_eq!(value["state"], "CLOSED");
        assert_eq!(value["failureCount"], 0);
        assert!(value.get("lastFailureTime").is_some());
        assert!(value.get("lastResetTime").is_some());
    }

    #[test]
    fn zero_thresholds_are_invalid() {
        let config = BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

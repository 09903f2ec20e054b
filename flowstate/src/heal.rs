//! Breaker-gated repair attempts.
//!
//! The driver asks [`HealGate::check`] before each automatic repair and
//! reports the outcome afterwards. Each call is load → mutate → persist
//! against `breakers/<name>.json`, so the breaker survives between processes.
//!
//! The half-open probe limit is advisory: the gate counts reported
//! successes but does not stop two processes from probing at once.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker, Gate};
use crate::error::Result;
use crate::io::breaker_store::BreakerStore;
use crate::workspace::Workspace;

/// Breaker used when the caller does not name one.
pub const DEFAULT_BREAKER: &str = "heal";

/// Snapshot plus the thresholds it is judged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub name: String,
    #[serde(flatten)]
    pub snapshot: BreakerSnapshot,
    pub config: BreakerConfig,
}

pub struct HealGate<'a> {
    ws: &'a Workspace,
    store: BreakerStore<'a>,
}

impl<'a> HealGate<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self {
            ws,
            store: BreakerStore::new(ws),
        }
    }

    /// May a repair be attempted now? A rejection is a normal answer.
    pub fn check(&self, name: &str) -> Result<Gate> {
        self.with_breaker(name, "check", |breaker, now| breaker.check(now))
    }

    pub fn record_success(&self, name: &str) -> Result<BreakerStatus> {
        self.with_breaker(name, "success", |breaker, now| breaker.record_success(now))?;
        self.status(name)
    }

    pub fn record_failure(&self, name: &str) -> Result<BreakerStatus> {
        self.with_breaker(name, "failure", |breaker, now| breaker.record_failure(now))?;
        self.status(name)
    }

    pub fn reset(&self, name: &str) -> Result<BreakerStatus> {
        self.with_breaker(name, "reset", |breaker, now| breaker.reset(now))?;
        self.status(name)
    }

    pub fn status(&self, name: &str) -> Result<BreakerStatus> {
        Ok(BreakerStatus {
            name: name.to_string(),
            snapshot: self.store.load(name)?,
            config: self.ws.config().breaker,
        })
    }

    fn with_breaker<T>(
        &self,
        name: &str,
        action: &str,
        op: impl FnOnce(&mut CircuitBreaker, chrono::DateTime<chrono::Utc>) -> T,
    ) -> Result<T> {
        let before = self.store.load(name)?;
        let mut breaker = CircuitBreaker::new(self.ws.config().breaker, before.clone());
        let result = op(&mut breaker, self.ws.now());
        let after = breaker.into_snapshot();
        if after != before {
            self.store.save(name, &after)?;
        }
        if after.state != before.state {
            match after.state {
                BreakerState::Open => warn!(
                    breaker = name,
                    failures = after.failure_count,
                    "breaker opened, rejecting repairs"
                ),
                _ => info!(breaker = name, from = ?before.state, to = ?after.state, "breaker moved"),
            }
            self.ws.events().record(
                "breaker.changed",
                None,
                Some(json!({ "name": name, "from": before.state, "to": after.state })),
            );
        }
        debug!(breaker = name, action, state = ?after.state, "breaker updated");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::FlowConfig;
    use crate::test_support::TestWorkspace;

    fn gate_workspace(failure_threshold: u32, timeout_ms: u64) -> TestWorkspace {
        let mut config = FlowConfig::default();
        config.breaker.failure_threshold = failure_threshold;
        config.breaker.timeout_ms = timeout_ms;
        TestWorkspace::with_config(config)
    }

    #[test]
    fn opens_after_threshold_and_rejects() {
        let tw = gate_workspace(2, 60_000);
        let heal = tw.ws().heal();
        assert_eq!(
            heal.check(DEFAULT_BREAKER).expect("check"),
            Gate::Allowed { state: BreakerState::Closed }
        );
        heal.record_failure(DEFAULT_BREAKER).expect("fail");
        let status = heal.record_failure(DEFAULT_BREAKER).expect("fail");
        assert_eq!(status.snapshot.state, BreakerState::Open);

        tw.clock().advance_secs(20);
        assert_eq!(
            heal.check(DEFAULT_BREAKER).expect("check"),
            Gate::Rejected { retry_after_ms: 40_000 }
        );
    }

    /// Verifies the half-open move made by `check` is persisted for the next process.
    #[test]
    fn cooldown_moves_to_half_open_and_persists() {
        let tw = gate_workspace(1, 1_000);
        let heal = tw.ws().heal();
        heal.record_failure(DEFAULT_BREAKER).expect("fail");
        tw.clock().advance_ms(1_000);

        assert_eq!(
            heal.check(DEFAULT_BREAKER).expect("check"),
            Gate::Allowed { state: BreakerState::HalfOpen }
        );
        assert_eq!(
            heal.status(DEFAULT_BREAKER).expect("status").snapshot.state,
            BreakerState::HalfOpen
        );

        let status = heal.record_failure(DEFAULT_BREAKER).expect("fail");
        assert_eq!(status.snapshot.state, BreakerState::Open);
    }

    #[test]
    fn half_open_success_closes() {
        let tw = gate_workspace(1, 0);
        let heal = tw.ws().heal();
        heal.record_failure(DEFAULT_BREAKER).expect("fail");
        heal.check(DEFAULT_BREAKER).expect("check");
        let status = heal.record_success(DEFAULT_BREAKER).expect("success");
        assert_eq!(status.snapshot.state, BreakerState::Closed);
        assert_eq!(status.snapshot.last_reset_time, Some(tw.clock().now()));
    }

    /// Verifies named breakers do not share counters.
    #[test]
    fn breakers_are_independent_and_resettable() {
        let tw = gate_workspace(1, 60_000);
        let heal = tw.ws().heal();
        heal.record_failure("lint").expect("fail");
        assert_eq!(
            heal.status("heal").expect("status").snapshot.state,
            BreakerState::Closed
        );
        let status = heal.reset("lint").expect("reset");
        assert_eq!(status.snapshot, BreakerSnapshot {
            last_reset_time: Some(tw.clock().now()),
            ..BreakerSnapshot::default()
        });
    }

    /// Verifies a breaker state change is recorded as an event.
    #[test]
    fn transitions_are_logged_as_events() {
        let tw = gate_workspace(1, 60_000);
        tw.ws().heal().record_failure(DEFAULT_BREAKER).expect("fail");
        let events = tw.ws().events().read_all().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "breaker.changed");
    }
}

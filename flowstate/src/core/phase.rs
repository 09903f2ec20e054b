//! Workflow phases and the singleton phase state.
//!
//! Forward path: `clarify → breakdown → implement → deliver → complete`.
//! `heal` is a side loop off `implement` and only ever returns to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Clarify,
    Breakdown,
    Implement,
    Heal,
    Deliver,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Clarify,
        Phase::Breakdown,
        Phase::Implement,
        Phase::Heal,
        Phase::Deliver,
        Phase::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Clarify => "clarify",
            Phase::Breakdown => "breakdown",
            Phase::Implement => "implement",
            Phase::Heal => "heal",
            Phase::Deliver => "deliver",
            Phase::Complete => "complete",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == raw)
            .ok_or_else(|| FlowError::validation(format!("unknown phase '{raw}'")))
    }

    /// Phases reachable in one step from `self`.
    pub fn successors(self) -> &'static [Phase] {
        match self {
            Phase::Clarify => &[Phase::Breakdown],
            Phase::Breakdown => &[Phase::Implement],
            Phase::Implement => &[Phase::Heal, Phase::Deliver],
            Phase::Heal => &[Phase::Implement],
            Phase::Deliver => &[Phase::Complete],
            Phase::Complete => &[],
        }
    }

    pub fn can_transition_to(self, to: Phase) -> bool {
        self == to || self.successors().contains(&to)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the append-only error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub phase: Phase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Caller-supplied error payload; the phase and timestamp are filled in on append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewError {
    pub message: String,
    pub task_id: Option<String>,
    pub details: Option<Value>,
}

/// Workflow progress for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub phase: Phase,
    #[serde(default)]
    pub current_task: Option<String>,
    /// Requirements document owned by the driver.
    #[serde(default)]
    pub prd: Option<Value>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update merged by [`PhaseState::apply`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatePatch {
    pub phase: Option<Phase>,
    /// `Some(None)` clears the current task.
    #[serde(with = "double_option")]
    pub current_task: Option<Option<String>>,
    pub prd: Option<Value>,
    pub errors: Option<Vec<ErrorRecord>>,
}

impl PhaseState {
    pub fn new(phase: Phase, now: DateTime<Utc>) -> Self {
        Self {
            phase,
            current_task: None,
            prd: None,
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Validated move to `to`; staying put is allowed.
    pub fn transition(&mut self, to: Phase, now: DateTime<Utc>) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(FlowError::InvalidTransition {
                entity: "phase",
                id: "state".to_string(),
                action: "move".to_string(),
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        self.phase = to;
        self.updated_at = now;
        Ok(())
    }

    /// Overwrite the phase without validation, keeping everything else.
    pub fn reset_phase(&mut self, phase: Phase, now: DateTime<Utc>) {
        self.phase = phase;
        self.updated_at = now;
    }

    /// Merge `patch`; a phase change is validated like [`Self::transition`].
    pub fn apply(&mut self, patch: StatePatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(phase) = patch.phase {
            self.transition(phase, now)?;
        }
        if let Some(current) = patch.current_task {
            self.current_task = current;
        }
        if let Some(prd) = patch.prd {
            self.prd = Some(prd);
        }
        if let Some(errors) = patch.errors {
            self.errors = errors;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn push_error(&mut self, error: NewError, now: DateTime<Utc>) -> Result<&ErrorRecord> {
        let message = error.message.trim();
        if message.is_empty() {
            return Err(FlowError::validation("error message must not be empty"));
        }
        self.errors.push(ErrorRecord {
            at: now,
            phase: self.phase,
            message: message.to_string(),
            task_id: error.task_id,
            details: error.details,
        });
        self.updated_at = now;
        self.errors
            .last()
            .ok_or_else(|| FlowError::corrupt("error list empty after push"))
    }
}

/// Serde helper distinguishing "absent" from explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, secs).unwrap()
    }

    #[test]
    fn forward_path_is_allowed() {
        let mut state = PhaseState::new(Phase::Clarify, at(0));
        for phase in [
            Phase::Breakdown,
            Phase::Implement,
            Phase::Heal,
            Phase::Implement,
            Phase::Deliver,
            Phase::Complete,
        ] {
            state.transition(phase, at(1)).expect("transition");
        }
        assert_eq!(state.phase, Phase::Complete);
        assert_eq!(state.started_at, at(0));
        assert_eq!(state.updated_at, at(1));
    }

    #[test]
    fn skipping_and_reversing_are_rejected() {
        let mut state = PhaseState::new(Phase::Clarify, at(0));
        let err = state.transition(Phase::Implement, at(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot move phase 'state': current clarify, requested implement"
        );

        let mut healing = PhaseState::new(Phase::Heal, at(0));
        assert!(healing.transition(Phase::Deliver, at(1)).is_err());
        assert!(!Phase::Deliver.can_transition_to(Phase::Implement));
        assert!(Phase::Complete.successors().is_empty());
    }

    #[test]
    fn apply_merges_partial_fields() {
        let mut state = PhaseState::new(Phase::Implement, at(0));
        state.prd = Some(json!({"title": "x"}));
        state
            .apply(
                StatePatch {
                    current_task: Some(Some("a.b".to_string())),
                    ..StatePatch::default()
                },
                at(5),
            )
            .expect("apply");
        assert_eq!(state.current_task.as_deref(), Some("a.b"));
        assert_eq!(state.prd, Some(json!({"title": "x"})));
        assert_eq!(state.updated_at, at(5));
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let clear: StatePatch = serde_json::from_value(json!({"currentTask": null})).unwrap();
        assert_eq!(clear.current_task, Some(None));
        let untouched: StatePatch = serde_json::from_value(json!({})).unwrap();
        assert_eq!(untouched.current_task, None);
    }

    #[test]
    fn push_error_tags_current_phase() {
        let mut state = PhaseState::new(Phase::Heal, at(0));
        let record = state
            .push_error(
                NewError {
                    message: " build broke ".to_string(),
                    task_id: Some("a.b".to_string()),
                    details: None,
                },
                at(2),
            )
            .expect("push")
            .clone();
        assert_eq!(record.phase, Phase::Heal);
        assert_eq!(record.message, "build broke");
        assert_eq!(state.errors.len(), 1);
    }
}

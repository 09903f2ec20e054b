//! Task entity and its lifecycle state machine.
//!
//! ```text
//! pending ──start──▶ in_progress ──complete──▶ completed
//!                        │  ▲
//!                      fail │ start (restart)
//!                        ▼  │
//!                       failed
//! ```
//!
//! Every other move is rejected with [`FlowError::InvalidTransition`].

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

static TASK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)+$").expect("task id pattern is valid")
});

/// Section headings used by the record narrative; descriptions may not contain them.
pub const CRITERIA_HEADING: &str = "## Acceptance Criteria";
pub const NOTES_HEADING: &str = "## Notes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| FlowError::validation(format!("unknown task status '{raw}'")))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test requirement attached by the driver. The core stores it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequirement {
    pub pattern: String,
    pub required: bool,
}

/// Caller-supplied fields for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewTask {
    pub id: String,
    /// Defaults to the id prefix; must match it when given.
    pub module: Option<String>,
    pub priority: i64,
    pub estimated_minutes: Option<u32>,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub dependencies: Vec<String>,
    pub test_requirements: Option<TestRequirement>,
}

/// Estimate used when the caller gives none.
pub const DEFAULT_ESTIMATE_MINUTES: u32 = 30;

/// One unit of trackable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub module: String,
    /// Creation order, used to break priority ties.
    pub sequence: u64,
    pub priority: i64,
    pub status: TaskStatus,
    pub estimated_minutes: u32,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub dependencies: Vec<String>,
    pub test_requirements: Option<TestRequirement>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Validate `spec` and build a `pending` task.
    pub fn new(spec: NewTask, sequence: u64, now: DateTime<Utc>) -> Result<Self> {
        let (module, _) = split_id(&spec.id)?;
        if let Some(given) = spec.module.as_deref()
            && given != module
        {
            return Err(FlowError::validation(format!(
                "module '{given}' does not match id prefix '{module}' of '{}'",
                spec.id
            )));
        }
        let estimated_minutes = spec.estimated_minutes.unwrap_or(DEFAULT_ESTIMATE_MINUTES);
        if estimated_minutes == 0 {
            return Err(FlowError::validation("estimatedMinutes must be > 0"));
        }
        let description = validate_description(&spec.description)?;
        let acceptance_criteria = spec
            .acceptance_criteria
            .iter()
            .map(|criterion| validate_criterion(criterion))
            .collect::<Result<Vec<_>>>()?;

        let mut dependencies: Vec<String> = Vec::with_capacity(spec.dependencies.len());
        for dep in spec.dependencies {
            let dep = dep.trim().to_string();
            validate_id(&dep)?;
            if dep == spec.id {
                return Err(FlowError::validation(format!(
                    "task '{dep}' cannot depend on itself"
                )));
            }
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Ok(Self {
            module: module.to_string(),
            id: spec.id,
            sequence,
            priority: spec.priority,
            status: TaskStatus::Pending,
            estimated_minutes,
            description,
            acceptance_criteria,
            dependencies,
            test_requirements: spec.test_requirements,
            notes: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    /// Final id segment, used as the record file stem.
    pub fn name(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }

    /// `pending | failed → in_progress`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Failed) {
            return Err(self.invalid("start", TaskStatus::InProgress));
        }
        self.status = TaskStatus::InProgress;
        self.started_at = Some(now);
        self.completed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `in_progress → completed`, optionally noting how long it took.
    pub fn complete(&mut self, minutes: Option<u32>, now: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid("complete", TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        if let Some(minutes) = minutes {
            self.push_note(&format!("Completed in {minutes} min."));
        }
        self.updated_at = now;
        Ok(())
    }

    /// `in_progress → failed`; the reason is appended to the notes.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid("fail", TaskStatus::Failed));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(FlowError::validation("failure reason must not be empty"));
        }
        self.status = TaskStatus::Failed;
        self.push_note(&format!("Failed: {reason}"));
        self.updated_at = now;
        Ok(())
    }

    /// Append a free-text annotation.
    pub fn add_note(&mut self, note: &str, now: DateTime<Utc>) -> Result<()> {
        if note.trim().is_empty() {
            return Err(FlowError::validation("note must not be empty"));
        }
        self.push_note(note);
        self.updated_at = now;
        Ok(())
    }

    fn push_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note.trim());
    }

    fn invalid(&self, action: &str, to: TaskStatus) -> FlowError {
        FlowError::InvalidTransition {
            entity: "task",
            id: self.id.clone(),
            action: action.to_string(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

/// Validate a dot-delimited task id.
pub fn validate_id(id: &str) -> Result<()> {
    if TASK_ID.is_match(id) {
        Ok(())
    } else {
        Err(FlowError::validation(format!(
            "task id '{id}' must look like 'module.name' ([A-Za-z0-9_-] segments)"
        )))
    }
}

/// Split `module.name` at the last dot.
pub fn split_id(id: &str) -> Result<(&str, &str)> {
    validate_id(id)?;
    id.rsplit_once('.')
        .ok_or_else(|| FlowError::validation(format!("task id '{id}' has no module prefix")))
}

fn validate_description(raw: &str) -> Result<String> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(FlowError::validation("description must not be empty"));
    }
    if description
        .lines()
        .any(|line| line.trim_end() == CRITERIA_HEADING || line.trim_end() == NOTES_HEADING)
    {
        return Err(FlowError::validation(format!(
            "description must not contain a '{CRITERIA_HEADING}' or '{NOTES_HEADING}' line"
        )));
    }
    Ok(description.to_string())
}

fn validate_criterion(raw: &str) -> Result<String> {
    let criterion = raw.trim();
    if criterion.is_empty() {
        return Err(FlowError::validation("acceptance criterion must not be empty"));
    }
    if criterion.contains('\n') {
        return Err(FlowError::validation(format!(
            "acceptance criterion must be a single line: '{criterion}'"
        )));
    }
    Ok(criterion.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    fn spec(id: &str) -> NewTask {
        NewTask {
            id: id.to_string(),
            description: "Do the thing".to_string(),
            ..NewTask::default()
        }
    }

    fn task(id: &str) -> Task {
        Task::new(spec(id), 1, now()).expect("task")
    }

    #[test]
    fn new_task_is_pending_with_module_from_id() {
        let task = task("auth.session.login");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.module, "auth.session");
        assert_eq!(task.name(), "login");
        assert_eq!(task.estimated_minutes, DEFAULT_ESTIMATE_MINUTES);
    }

    #[test]
    fn new_task_rejects_mismatched_module() {
        let mut spec = spec("auth.login");
        spec.module = Some("billing".to_string());
        let err = Task::new(spec, 1, now()).unwrap_err();
        assert!(err.to_string().contains("does not match id prefix"));
    }

    #[test]
    fn new_task_rejects_bad_ids_and_self_dependency() {
        assert!(Task::new(spec("nomodule"), 1, now()).is_err());
        assert!(Task::new(spec("a..b"), 1, now()).is_err());

        let mut spec = spec("a.b");
        spec.dependencies = vec!["a.b".to_string()];
        assert!(Task::new(spec, 1, now()).is_err());
    }

    #[test]
    fn new_task_dedups_dependencies_in_order() {
        let mut spec = spec("a.c");
        spec.dependencies = vec!["a.b".into(), "x.y".into(), "a.b".into()];
        let task = Task::new(spec, 1, now()).expect("task");
        assert_eq!(task.dependencies, vec!["a.b".to_string(), "x.y".to_string()]);
    }

    #[test]
    fn description_cannot_embed_section_headings() {
        let mut spec = spec("a.b");
        spec.description = "intro\n## Notes\nmore".to_string();
        assert!(matches!(
            Task::new(spec, 1, now()),
            Err(FlowError::Validation(_))
        ));
    }

    #[test]
    fn complete_and_fail_from_pending_are_rejected() {
        let mut task = task("a.b");
        let err = task.complete(None, now()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { .. }));
        assert!(err.to_string().contains("current pending"));
        assert!(matches!(
            task.fail("nope", now()),
            Err(FlowError::InvalidTransition { .. })
        ));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn start_from_completed_is_rejected() {
        let mut task = task("a.b");
        task.start(now()).expect("start");
        task.complete(Some(12), now()).expect("complete");
        assert!(task.start(now()).is_err());
        assert_eq!(task.notes, "Completed in 12 min.");
    }

    #[test]
    fn failed_task_can_restart() {
        let mut task = task("a.b");
        task.start(now()).expect("start");
        task.fail("tests red", now()).expect("fail");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.notes, "Failed: tests red");

        task.start(now()).expect("restart");
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn in_progress_cannot_start_again() {
        let mut task = task("a.b");
        task.start(now()).expect("start");
        let err = task.start(now()).unwrap_err();
        assert!(err.to_string().contains("current in_progress"));
    }

    #[test]
    fn notes_append_with_newlines() {
        let mut task = task("a.b");
        task.add_note("  first  ", now()).expect("note");
        task.add_note("second", now()).expect("note");
        assert_eq!(task.notes, "first\nsecond");
        assert!(task.add_note("   ", now()).is_err());
    }

    #[test]
    fn status_parses_snake_case() {
        assert_eq!(TaskStatus::parse("in_progress").unwrap(), TaskStatus::InProgress);
        assert!(TaskStatus::parse("done").is_err());
    }
}

//! Task record codec: YAML front matter followed by a markdown narrative.
//!
//! ```text
//! ---
//! id: auth.login
//! module: auth
//! ...
//! ---
//!
//! <description>
//!
//! ## Acceptance Criteria
//!
//! - <criterion>
//!
//! ## Notes
//!
//! <notes>
//! ```
//!
//! Descriptions never contain a heading line and criteria are single lines,
//! so splitting on the first heading is unambiguous.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::task::{CRITERIA_HEADING, NOTES_HEADING, Task, TaskStatus, TestRequirement};
use crate::error::{FlowError, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordHeader {
    id: String,
    module: String,
    sequence: u64,
    priority: i64,
    status: TaskStatus,
    estimated_minutes: u32,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_requirements: Option<TestRequirement>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

/// Render a task as its on-disk record.
pub fn render_record(task: &Task) -> Result<String> {
    let header = RecordHeader {
        id: task.id.clone(),
        module: task.module.clone(),
        sequence: task.sequence,
        priority: task.priority,
        status: task.status,
        estimated_minutes: task.estimated_minutes,
        dependencies: task.dependencies.clone(),
        test_requirements: task.test_requirements.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
    };
    let yaml = serde_yaml::to_string(&header)
        .map_err(|err| FlowError::corrupt(format!("serialize record {}: {err}", task.id)))?;

    let mut buf = String::new();
    buf.push_str("---\n");
    buf.push_str(&yaml);
    if !yaml.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str("---\n\n");
    buf.push_str(&task.description);
    buf.push_str("\n\n");
    buf.push_str(CRITERIA_HEADING);
    buf.push_str("\n\n");
    for criterion in &task.acceptance_criteria {
        buf.push_str("- ");
        buf.push_str(criterion);
        buf.push('\n');
    }
    buf.push('\n');
    buf.push_str(NOTES_HEADING);
    buf.push_str("\n\n");
    if !task.notes.is_empty() {
        buf.push_str(&task.notes);
        buf.push('\n');
    }
    Ok(buf)
}

/// Parse a record produced by [`render_record`] (or hand-edited in the same shape).
pub fn parse_record(contents: &str) -> Result<Task> {
    let after_open = contents
        .strip_prefix("---\n")
        .ok_or_else(|| FlowError::corrupt("task record is missing front matter"))?;
    let close = after_open
        .find("\n---\n")
        .ok_or_else(|| FlowError::corrupt("task record front matter is not terminated"))?;
    let header_raw = &after_open[..=close];
    let body = &after_open[close + "\n---\n".len()..];

    let header: RecordHeader = serde_yaml::from_str(header_raw)
        .map_err(|err| FlowError::corrupt(format!("parse task record header: {err}")))?;

    let criteria_marker = format!("\n{CRITERIA_HEADING}\n");
    let notes_marker = format!("\n{NOTES_HEADING}\n");

    let (description, criteria_raw, notes) = match body.find(&criteria_marker) {
        Some(pos) => {
            let description = &body[..pos];
            let rest = &body[pos + criteria_marker.len()..];
            match rest.find(&notes_marker) {
                Some(npos) => (
                    description,
                    &rest[..npos],
                    &rest[npos + notes_marker.len()..],
                ),
                None => (description, rest, ""),
            }
        }
        None => match body.find(&notes_marker) {
            Some(npos) => (&body[..npos], "", &body[npos + notes_marker.len()..]),
            None => (body, "", ""),
        },
    };

    let acceptance_criteria = criteria_raw
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("- "))
        .map(|criterion| criterion.trim().to_string())
        .filter(|criterion| !criterion.is_empty())
        .collect();

    Ok(Task {
        id: header.id,
        module: header.module,
        sequence: header.sequence,
        priority: header.priority,
        status: header.status,
        estimated_minutes: header.estimated_minutes,
        description: description.trim().to_string(),
        acceptance_criteria,
        dependencies: header.dependencies,
        test_requirements: header.test_requirements,
        notes: notes.trim().to_string(),
        created_at: header.created_at,
        updated_at: header.updated_at,
        started_at: header.started_at,
        completed_at: header.completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::NewTask;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).unwrap()
    }

    fn minimal() -> Task {
        Task::new(
            NewTask {
                id: "core.parser".to_string(),
                description: "Write the parser".to_string(),
                ..NewTask::default()
            },
            7,
            at(0),
        )
        .expect("task")
    }

    #[test]
    fn minimal_record_round_trips() {
        let task = minimal();
        let parsed = parse_record(&render_record(&task).expect("render")).expect("parse");
        assert_eq!(parsed, task);
        assert!(parsed.acceptance_criteria.is_empty());
        assert!(parsed.test_requirements.is_none());
        assert!(parsed.started_at.is_none());
    }

    #[test]
    fn fully_populated_record_round_trips() {
        let mut task = Task::new(
            NewTask {
                id: "api.v2.users".to_string(),
                module: Some("api.v2".to_string()),
                priority: -3,
                estimated_minutes: Some(45),
                description: "Expose users.\n\nSupport paging: yes, `limit` and `offset`.".to_string(),
                acceptance_criteria: vec![
                    "GET /users returns 200".to_string(),
                    "- nested dash stays".to_string(),
                ],
                dependencies: vec!["api.v2.auth".to_string(), "db.schema".to_string()],
                test_requirements: Some(TestRequirement {
                    pattern: "tests/users_*.rs".to_string(),
                    required: true,
                }),
            },
            3,
            at(1),
        )
        .expect("task");
        task.start(at(2)).expect("start");
        task.fail("flaky db\n## Notes inside notes is fine", at(3))
            .expect("fail");
        task.start(at(4)).expect("restart");
        task.complete(Some(50), at(5)).expect("complete");

        let rendered = render_record(&task).expect("render");
        assert!(rendered.starts_with("---\nid: api.v2.users\n"));
        let parsed = parse_record(&rendered).expect("parse");
        assert_eq!(parsed, task);
    }

    #[test]
    fn rendered_layout_is_stable() {
        let mut task = minimal();
        task.acceptance_criteria = vec!["parses".to_string()];
        task.notes = "first".to_string();
        let rendered = render_record(&task).expect("render");
        assert!(rendered.ends_with(
            "---\n\nWrite the parser\n\n## Acceptance Criteria\n\n- parses\n\n## Notes\n\nfirst\n"
        ));
    }

    #[test]
    fn missing_front_matter_is_corrupt() {
        let err = parse_record("# just markdown\n").unwrap_err();
        assert!(matches!(err, FlowError::CorruptState(_)));
    }

    #[test]
    fn hand_edited_record_without_sections_parses() {
        let rendered = render_record(&minimal()).expect("render");
        let header_end = rendered.find("\n---\n").expect("header") + "\n---\n".len();
        let edited = format!("{}\nRewritten by hand.\n", &rendered[..header_end]);
        let parsed = parse_record(&edited).expect("parse");
        assert_eq!(parsed.description, "Rewritten by hand.");
        assert!(parsed.notes.is_empty());
    }
}

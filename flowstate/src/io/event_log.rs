//! Append-only event trail in `.flow/logs/events.jsonl`.
//!
//! One JSON object per line. This is a product artifact, independent of
//! `RUST_LOG`; archiving a session moves the whole `logs/` directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{FlowError, Result, fs_error};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

pub struct EventLog<'a> {
    ws: &'a Workspace,
}

impl<'a> EventLog<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self { ws }
    }

    pub fn append(&self, kind: &str, task_id: Option<&str>, detail: Option<Value>) -> Result<()> {
        let event = Event {
            at: self.ws.now(),
            kind: kind.to_string(),
            task_id: task_id.map(str::to_string),
            detail,
        };
        let mut line = serde_json::to_string(&event)
            .map_err(|err| FlowError::corrupt(format!("serialize event: {err}")))?;
        line.push('\n');
        let path = &self.ws.paths().events_path;
        self.ws
            .fs()
            .append(path, &line)
            .map_err(fs_error("append event", path.as_path()))
    }

    /// Like [`Self::append`], but a failure is only logged. The trail never
    /// fails an operation that has already been persisted.
    pub fn record(&self, kind: &str, task_id: Option<&str>, detail: Option<Value>) {
        if let Err(err) = self.append(kind, task_id, detail) {
            warn!(kind, error = %err, "could not append event");
        }
    }

    /// All events in the current session's trail. Blank lines are skipped.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let path = &self.ws.paths().events_path;
        if !self.ws.fs().exists(path) {
            return Ok(Vec::new());
        }
        let contents = self
            .ws
            .fs()
            .read_to_string(path)
            .map_err(fs_error("read events", path.as_path()))?;
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|err| {
                    FlowError::corrupt(format!("{}:{}: {err}", path.display(), n + 1))
                })
            })
            .collect()
    }
}

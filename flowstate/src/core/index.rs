//! Denormalized projection of every task plus workspace metadata.
//!
//! The index is a cache: the per-task records stay authoritative and the
//! projection can always be rebuilt from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::task::{Task, TaskStatus};
use crate::error::{FlowError, Result};

pub const INDEX_VERSION: u32 = 1;

/// Per-task row in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub status: TaskStatus,
    pub priority: i64,
    pub module: String,
    pub description: String,
    /// Record location relative to the workspace directory.
    pub file: String,
    pub sequence: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskSummary {
    pub fn from_task(task: &Task, file: String) -> Self {
        Self {
            status: task.status,
            priority: task.priority,
            module: task.module.clone(),
            description: task.description.clone(),
            file,
            sequence: task.sequence,
            dependencies: task.dependencies.clone(),
        }
    }
}

/// Workspace-wide metadata. Keys the core does not know are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_config: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Shallow merge: each key in `patch` replaces the stored value, `null` removes it.
    pub fn merge(&self, patch: &Map<String, Value>) -> Result<Self> {
        let mut current = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(err) => return Err(FlowError::corrupt(format!("serialize metadata: {err}"))),
        };
        for (key, value) in patch {
            if value.is_null() {
                current.remove(key);
            } else {
                current.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(current))
            .map_err(|err| FlowError::validation(format!("invalid metadata: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Sequence number handed to the next created task.
    #[serde(default = "first_sequence")]
    pub next_sequence: u64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSummary>,
}

fn first_sequence() -> u64 {
    1
}

impl Index {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: INDEX_VERSION,
            updated_at: now,
            next_sequence: first_sequence(),
            metadata: Metadata::default(),
            tasks: BTreeMap::new(),
        }
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.get(id).map(|summary| summary.status)
    }

    /// Insert or replace the row for `task`, keeping `next_sequence` ahead of it.
    pub fn upsert(&mut self, task: &Task, file: String) {
        self.next_sequence = self.next_sequence.max(task.sequence + 1);
        self.tasks
            .insert(task.id.clone(), TaskSummary::from_task(task, file));
    }

    pub fn remove(&mut self, id: &str) -> Option<TaskSummary> {
        self.tasks.remove(id)
    }

    /// Reserve the next creation sequence number.
    pub fn allocate_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

//! Deterministic filtering, ordering and next-task selection over the index.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::index::{Index, TaskSummary};
use crate::core::task::TaskStatus;
use crate::error::{FlowError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub module: Option<String>,
    pub priority: Option<i64>,
    pub has_dependencies: Option<bool>,
    /// Only pending tasks whose dependencies are all completed.
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Priority,
    Id,
    Status,
    Created,
}

impl SortKey {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "priority" => Ok(SortKey::Priority),
            "id" => Ok(SortKey::Id),
            "status" => Ok(SortKey::Status),
            "created" => Ok(SortKey::Created),
            other => Err(FlowError::validation(format!(
                "unknown sort key '{other}' (expected priority, id, status or created)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub filter: TaskFilter,
    pub sort: SortKey,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Ids selected by a [`ListQuery`] plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub ids: Vec<String>,
    pub total: usize,
}

/// True when every dependency resolves to a completed task.
///
/// Unknown dependency ids count as unsatisfied.
pub fn dependencies_met(index: &Index, summary: &TaskSummary) -> bool {
    summary
        .dependencies
        .iter()
        .all(|dep| index.status_of(dep) == Some(TaskStatus::Completed))
}

/// A pending task with all dependencies completed.
pub fn is_ready(index: &Index, summary: &TaskSummary) -> bool {
    summary.status == TaskStatus::Pending && dependencies_met(index, summary)
}

pub fn matches(index: &Index, summary: &TaskSummary, filter: &TaskFilter) -> bool {
    if filter.status.is_some_and(|status| status != summary.status) {
        return false;
    }
    if filter
        .module
        .as_deref()
        .is_some_and(|module| module != summary.module)
    {
        return false;
    }
    if filter
        .priority
        .is_some_and(|priority| priority != summary.priority)
    {
        return false;
    }
    if filter
        .has_dependencies
        .is_some_and(|has| has == summary.dependencies.is_empty())
    {
        return false;
    }
    if filter.ready && !is_ready(index, summary) {
        return false;
    }
    true
}

/// Filter, order and page the index.
pub fn select(index: &Index, query: &ListQuery) -> Selection {
    let mut rows: Vec<(&String, &TaskSummary)> = index
        .tasks
        .iter()
        .filter(|(_, summary)| matches(index, summary, &query.filter))
        .collect();
    rows.sort_by(|a, b| compare(query.sort, *a, *b));

    let total = rows.len();
    let limit = query.limit.unwrap_or(usize::MAX);
    let ids = rows
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .map(|(id, _)| id.clone())
        .collect();
    Selection { ids, total }
}

/// Lowest-priority ready task, ties broken by creation order.
pub fn next_ready(index: &Index) -> Option<&str> {
    index
        .tasks
        .iter()
        .filter(|(_, summary)| is_ready(index, summary))
        .min_by(|a, b| compare(SortKey::Priority, *a, *b))
        .map(|(id, _)| id.as_str())
}

fn compare(
    key: SortKey,
    (a_id, a): (&String, &TaskSummary),
    (b_id, b): (&String, &TaskSummary),
) -> Ordering {
    let primary = match key {
        SortKey::Priority => a.priority.cmp(&b.priority),
        SortKey::Id => a_id.cmp(b_id),
        SortKey::Status => status_rank(a.status).cmp(&status_rank(b.status)),
        SortKey::Created => Ordering::Equal,
    };
    primary
        .then_with(|| a.sequence.cmp(&b.sequence))
        .then_with(|| a_id.cmp(b_id))
}

fn status_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::InProgress => 0,
        TaskStatus::Pending => 1,
        TaskStatus::Failed => 2,
        TaskStatus::Completed => 3,
    }
}

//! Task Service: creation, listing, next-task selection, lifecycle calls and batches.
//!
//! Every call is load → mutate → persist through [`TaskStore`]; nothing is
//! cached between calls.

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::core::batch::{BatchOp, BatchOutcome, OpOutcome, OpResult, validate_batch};
use crate::core::index::{Index, Metadata};
use crate::core::query::{ListQuery, is_ready, next_ready, select};
use crate::core::task::{NewTask, Task, TaskStatus, validate_id};
use crate::error::{FlowError, Result};
use crate::io::task_store::{IntegrityReport, RebuildReport, TaskStore};
use crate::workspace::Workspace;

/// One page of [`TaskService::list_tasks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Matches before paging.
    pub total: usize,
    pub returned: usize,
    pub offset: usize,
}

/// Counts per status, plus how many pending tasks are ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub ready: usize,
}

pub struct TaskService<'a> {
    ws: &'a Workspace,
    store: TaskStore<'a>,
}

impl<'a> TaskService<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self {
            ws,
            store: TaskStore::new(ws),
        }
    }

    /// Create a `pending` task. Fails with `DuplicateId` if the id is taken.
    pub fn create_task(&self, spec: NewTask) -> Result<Task> {
        validate_id(&spec.id)?;
        if self.store.find_by_id(&spec.id)?.is_some() {
            return Err(FlowError::DuplicateId(spec.id));
        }
        let mut index = self.store.index().read()?;
        let sequence = index.allocate_sequence();
        let task = Task::new(spec, sequence, self.ws.now())?;
        self.store.save_with_index(&task, &mut index)?;
        info!(task_id = %task.id, priority = task.priority, "task created");
        self.ws.events().record(
            "task.created",
            Some(task.id.as_str()),
            Some(json!({ "priority": task.priority, "dependencies": task.dependencies })),
        );
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.store.get(id)
    }

    pub fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage> {
        let index = self.store.index().read()?;
        let selection = select(&index, query);
        let tasks = self.store.load_many(&index, &selection.ids)?;
        debug!(total = selection.total, returned = tasks.len(), "tasks listed");
        Ok(TaskPage {
            returned: tasks.len(),
            total: selection.total,
            offset: query.offset,
            tasks,
        })
    }

    /// Lowest-priority ready task. `Ok(None)` means no work is available.
    pub fn next_task(&self) -> Result<Option<Task>> {
        let index = self.store.index().read()?;
        let Some(id) = next_ready(&index) else {
            debug!("no eligible task");
            return Ok(None);
        };
        let mut tasks = self.store.load_many(&index, &[id.to_string()])?;
        Ok(tasks.pop())
    }

    /// `pending | failed → in_progress`; becomes the current task of the session.
    pub fn start_task(&self, id: &str) -> Result<Task> {
        let task = self.mutate(id, |task, now| task.start(now))?;
        self.ws.events().record("task.started", Some(id), None);
        self.ws.state().follow_task(&task);
        Ok(task)
    }

    pub fn complete_task(&self, id: &str, minutes: Option<u32>) -> Result<Task> {
        let task = self.mutate(id, |task, now| task.complete(minutes, now))?;
        self.ws.events().record(
            "task.completed",
            Some(id),
            minutes.map(|minutes| json!({ "minutes": minutes })),
        );
        self.ws.state().follow_task(&task);
        Ok(task)
    }

    pub fn fail_task(&self, id: &str, reason: &str) -> Result<Task> {
        let task = self.mutate(id, |task, now| task.fail(reason, now))?;
        self.ws
            .events()
            .record("task.failed", Some(id), Some(json!({ "reason": reason.trim() })));
        self.ws.state().follow_task(&task);
        Ok(task)
    }

    pub fn add_note(&self, id: &str, note: &str) -> Result<Task> {
        let task = self.mutate(id, |task, now| task.add_note(note, now))?;
        self.ws.events().record("task.noted", Some(id), None);
        Ok(task)
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        self.store.delete(id)?;
        self.ws.events().record("task.deleted", Some(id), None);
        self.ws.state().forget_task(id);
        Ok(())
    }

    pub fn progress(&self) -> Result<Progress> {
        let index = self.store.index().read()?;
        Ok(progress_of(&index))
    }

    /// Run `ops` in order.
    ///
    /// Non-atomic: each op stands on its own. Atomic: the first failure
    /// restores every touched record and the index to their pre-batch state,
    /// and the remaining ops are skipped.
    pub fn batch(&self, ops: &[BatchOp], atomic: bool) -> Result<BatchOutcome> {
        validate_batch(ops)?;
        let index_before = self.store.index().read()?;
        let mut before: Vec<(String, Option<Task>)> = Vec::new();
        let mut applied: Vec<Task> = Vec::new();
        let mut results = Vec::with_capacity(ops.len());
        let mut aborted = false;

        for (position, op) in ops.iter().enumerate() {
            let task_id = op.task_id();
            let outcome = if aborted {
                OpOutcome::Skipped
            } else {
                if atomic && !before.iter().any(|(id, _)| id == task_id) {
                    // An unreadable task fails in apply_op below; nothing to capture.
                    if let Ok(task) = self.store.find_by_id(task_id) {
                        before.push((task_id.to_string(), task));
                    }
                }
                match self.apply_op(op) {
                    Ok(task) => {
                        let status = task.status;
                        applied.push(task);
                        OpOutcome::Applied { status }
                    }
                    Err(err) => {
                        warn!(position, task_id, error = %err, "batch operation failed");
                        aborted = atomic;
                        OpOutcome::Failed {
                            code: err.code().to_string(),
                            error: err.to_string(),
                        }
                    }
                }
            };
            results.push(OpResult {
                position,
                kind: op.kind().to_string(),
                task_id: task_id.to_string(),
                outcome,
            });
        }

        if aborted {
            self.roll_back(&before, &index_before)?;
            for result in &mut results {
                if matches!(result.outcome, OpOutcome::Applied { .. }) {
                    result.outcome = OpOutcome::RolledBack;
                }
            }
        } else {
            for task in &applied {
                self.ws.state().follow_task(task);
            }
        }

        let outcome = BatchOutcome::from_results(atomic, results);
        info!(
            ops = ops.len(),
            atomic,
            committed = outcome.committed,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "batch finished"
        );
        self.ws.events().record(
            if outcome.committed { "batch.applied" } else { "batch.rolled_back" },
            None,
            Some(json!({
                "atomic": atomic,
                "succeeded": outcome.succeeded,
                "failed": outcome.failed,
            })),
        );
        Ok(outcome)
    }

    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let report = self.store.rebuild_index()?;
        self.ws.events().record(
            "index.rebuilt",
            None,
            Some(json!({ "indexed": report.indexed, "dropped": report.dropped })),
        );
        Ok(report)
    }

    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.store.check_integrity()
    }

    pub fn metadata(&self) -> Result<Metadata> {
        Ok(self.store.index().read()?.metadata)
    }

    pub fn update_metadata(&self, patch: &Map<String, Value>) -> Result<Metadata> {
        let index = self.store.index().update_metadata(patch)?;
        self.ws.events().record(
            "index.metadata",
            None,
            Some(json!({ "keys": patch.keys().collect::<Vec<_>>() })),
        );
        Ok(index.metadata)
    }

    fn apply_op(&self, op: &BatchOp) -> Result<Task> {
        let task = match op {
            BatchOp::Start { task_id } => self.mutate(task_id, |task, now| task.start(now))?,
            BatchOp::Done { task_id, minutes } => {
                self.mutate(task_id, |task, now| task.complete(*minutes, now))?
            }
            BatchOp::Fail { task_id, reason } => {
                self.mutate(task_id, |task, now| task.fail(reason, now))?
            }
        };
        debug!(task_id = %task.id, kind = op.kind(), status = %task.status, "batch op applied");
        Ok(task)
    }

    fn roll_back(&self, before: &[(String, Option<Task>)], index: &Index) -> Result<()> {
        let restored = before
            .iter()
            .rev()
            .try_for_each(|(id, task)| self.store.restore_record(id, task.as_ref()))
            .and_then(|()| self.store.index().restore(index));
        match restored {
            Ok(()) => {
                info!(tasks = before.len(), "atomic batch rolled back");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "atomic batch rollback incomplete");
                Err(FlowError::corrupt(format!(
                    "atomic batch rollback incomplete ({err}); run `flowstate index check`"
                )))
            }
        }
    }

    fn mutate<F>(&self, id: &str, change: F) -> Result<Task>
    where
        F: FnOnce(&mut Task, chrono::DateTime<chrono::Utc>) -> Result<()>,
    {
        let mut task = self.store.get(id)?;
        change(&mut task, self.ws.now())?;
        self.store.save(&task)?;
        debug!(task_id = %id, status = %task.status, "task updated");
        Ok(task)
    }
}

fn progress_of(index: &Index) -> Progress {
    let mut progress = Progress {
        total: index.tasks.len(),
        ..Progress::default()
    };
    for summary in index.tasks.values() {
        match summary.status {
            TaskStatus::Pending => progress.pending += 1,
            TaskStatus::InProgress => progress.in_progress += 1,
            TaskStatus::Completed => progress.completed += 1,
            TaskStatus::Failed => progress.failed += 1,
        }
        if is_ready(index, summary) {
            progress.ready += 1;
        }
    }
    progress
}

//! State Service: the singleton phase state and session archival.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::phase::{ErrorRecord, NewError, Phase, PhaseState, StatePatch};
use crate::core::task::{Task, TaskStatus, validate_id};
use crate::error::{FlowError, Result, fs_error};
use crate::io::state_store::StateStore;
use crate::io::task_store::TaskStore;
use crate::workspace::Workspace;

/// Result of [`StateService::archive_session`]. Only `Archived` changed anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived {
        location: PathBuf,
        moved: Vec<String>,
    },
    /// The session is not complete and `force` was not given.
    Blocked { phase: Phase },
    NoSession,
}

pub struct StateService<'a> {
    ws: &'a Workspace,
    store: StateStore<'a>,
}

impl<'a> StateService<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self {
            ws,
            store: StateStore::new(ws),
        }
    }

    pub fn exists(&self) -> bool {
        self.ws.fs().exists(&self.ws.paths().state_path)
    }

    pub fn get_state(&self) -> Result<PhaseState> {
        self.store
            .load()?
            .ok_or_else(|| FlowError::not_found("state", "session"))
    }

    /// Start a session in `phase`, or set the phase of the existing one.
    ///
    /// An existing session keeps `startedAt`, `prd`, `errors` and the current task.
    pub fn initialize_state(&self, phase: Phase) -> Result<PhaseState> {
        let now = self.ws.now();
        let state = match self.store.load()? {
            Some(mut state) => {
                debug!(from = %state.phase, to = %phase, "resetting phase of existing session");
                state.reset_phase(phase, now);
                state
            }
            None => PhaseState::new(phase, now),
        };
        self.store.save(&state)?;
        info!(phase = %phase, "state initialized");
        self.ws
            .events()
            .record("state.initialized", None, Some(json!({ "phase": phase })));
        Ok(state)
    }

    /// Validated phase move.
    pub fn transition_phase(&self, to: Phase) -> Result<PhaseState> {
        let mut state = self.get_state()?;
        let from = state.phase;
        state.transition(to, self.ws.now())?;
        self.store.save(&state)?;
        if from != to {
            info!(%from, %to, "phase changed");
            self.ws
                .events()
                .record("phase.changed", None, Some(json!({ "from": from, "to": to })));
        }
        Ok(state)
    }

    /// Merge a partial update; a phase change inside it is validated.
    pub fn update_state(&self, patch: StatePatch) -> Result<PhaseState> {
        let mut state = self.get_state()?;
        if let Some(Some(id)) = &patch.current_task {
            self.ensure_task(id)?;
        }
        let from = state.phase;
        state.apply(patch, self.ws.now())?;
        self.store.save(&state)?;
        debug!(phase = %state.phase, "state updated");
        self.ws.events().record(
            "state.updated",
            None,
            Some(json!({ "from": from, "phase": state.phase })),
        );
        Ok(state)
    }

    /// Point the session at `id` (must exist), or clear it with `None`.
    pub fn set_current_task(&self, id: Option<&str>) -> Result<PhaseState> {
        let mut state = self.get_state()?;
        if let Some(id) = id {
            self.ensure_task(id)?;
        }
        state.current_task = id.map(str::to_string);
        state.updated_at = self.ws.now();
        self.store.save(&state)?;
        self.ws.events().record("state.current_task", id, None);
        Ok(state)
    }

    /// Append an error tagged with the current phase.
    pub fn record_error(&self, error: NewError) -> Result<ErrorRecord> {
        let mut state = self.get_state()?;
        let record = state.push_error(error, self.ws.now())?.clone();
        self.store.save(&state)?;
        info!(phase = %record.phase, message = %record.message, "error recorded");
        self.ws.events().record(
            "state.error",
            record.task_id.as_deref(),
            Some(json!({ "message": record.message })),
        );
        Ok(record)
    }

    /// Remove the session state. Returns whether there was one.
    pub fn clear_state(&self) -> Result<bool> {
        let removed = self.store.remove()?;
        if removed {
            info!("state cleared");
            self.ws.events().record("state.cleared", None, None);
        }
        Ok(removed)
    }

    /// Move the state file, event log and breakers into `archive/<timestamp>/`.
    ///
    /// Refused with [`ArchiveOutcome::Blocked`] unless the session is
    /// complete or `force` is set. Tasks and the index stay in place.
    pub fn archive_session(&self, force: bool) -> Result<ArchiveOutcome> {
        let Some(state) = self.store.load()? else {
            return Ok(ArchiveOutcome::NoSession);
        };
        if state.phase != Phase::Complete && !force {
            info!(phase = %state.phase, "archive blocked");
            return Ok(ArchiveOutcome::Blocked { phase: state.phase });
        }

        let fs = self.ws.fs();
        let paths = self.ws.paths();
        let location = self.archive_location()?;
        fs.ensure_dir(&location)
            .map_err(fs_error("create archive", location.as_path()))?;
        self.ws.events().record(
            "session.archived",
            None,
            Some(json!({ "phase": state.phase, "forced": force && state.phase != Phase::Complete })),
        );

        let mut moved = Vec::new();
        for (name, source) in [
            ("state.json", &paths.state_path),
            ("logs", &paths.logs_dir),
            ("breakers", &paths.breakers_dir),
        ] {
            if !fs.exists(source) {
                continue;
            }
            let target = location.join(name);
            fs.rename(source, &target)
                .map_err(fs_error("archive", source.as_path()))?;
            moved.push(name.to_string());
        }
        for dir in [&paths.logs_dir, &paths.breakers_dir] {
            fs.ensure_dir(dir)
                .map_err(fs_error("create directory", dir.as_path()))?;
        }

        info!(location = %location.display(), moved = ?moved, "session archived");
        Ok(ArchiveOutcome::Archived { location, moved })
    }

    /// Keep `currentTask` in step with a task that just changed status.
    /// Does nothing when no session exists. Best-effort: the task change has
    /// already been saved, so a failure here is logged and not returned.
    pub(crate) fn follow_task(&self, task: &Task) {
        if let Err(err) = self.try_follow_task(task) {
            warn!(task_id = %task.id, error = %err, "current task not updated");
        }
    }

    /// Clear `currentTask` if it names a deleted task. Best-effort like
    /// [`Self::follow_task`].
    pub(crate) fn forget_task(&self, id: &str) {
        if let Err(err) = self.try_forget_task(id) {
            warn!(task_id = id, error = %err, "current task not cleared");
        }
    }

    fn try_follow_task(&self, task: &Task) -> Result<()> {
        let Some(mut state) = self.store.load()? else {
            return Ok(());
        };
        let next = match task.status {
            TaskStatus::InProgress => Some(task.id.clone()),
            TaskStatus::Completed | TaskStatus::Failed
                if state.current_task.as_deref() == Some(task.id.as_str()) =>
            {
                None
            }
            _ => return Ok(()),
        };
        if state.current_task == next {
            return Ok(());
        }
        state.current_task = next;
        state.updated_at = self.ws.now();
        self.store.save(&state)
    }

    fn try_forget_task(&self, id: &str) -> Result<()> {
        let Some(mut state) = self.store.load()? else {
            return Ok(());
        };
        if state.current_task.as_deref() != Some(id) {
            return Ok(());
        }
        state.current_task = None;
        state.updated_at = self.ws.now();
        self.store.save(&state)
    }

    fn ensure_task(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        TaskStore::new(self.ws).get(id).map(|_| ())
    }

    fn archive_location(&self) -> Result<PathBuf> {
        let stamp = self.ws.now().format("%Y%m%dT%H%M%SZ").to_string();
        let base = self.ws.paths().archive_dir.join(&stamp);
        if !self.ws.fs().exists(&base) {
            return Ok(base);
        }
        (1..1000)
            .map(|n| self.ws.paths().archive_dir.join(format!("{stamp}-{n}")))
            .find(|candidate| !self.ws.fs().exists(candidate))
            .ok_or_else(|| FlowError::validation(format!("too many archives named {stamp}")))
    }
}

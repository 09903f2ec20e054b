//! Phase state storage (`.flow/state.json`).

use std::io;

use tracing::debug;

use crate::core::phase::PhaseState;
use crate::error::{FlowError, Result, fs_error};
use crate::workspace::Workspace;

pub struct StateStore<'a> {
    ws: &'a Workspace,
}

impl<'a> StateStore<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self { ws }
    }

    /// `Ok(None)` when no session has been started.
    pub fn load(&self) -> Result<Option<PhaseState>> {
        let path = &self.ws.paths().state_path;
        let contents = match self.ws.fs().read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(fs_error("read state", path.as_path())(err)),
        };
        let state: PhaseState = serde_json::from_str(&contents)
            .map_err(|err| FlowError::corrupt(format!("parse {}: {err}", path.display())))?;
        debug!(phase = %state.phase, "state loaded");
        Ok(Some(state))
    }

    pub fn save(&self, state: &PhaseState) -> Result<()> {
        let path = &self.ws.paths().state_path;
        let mut buf = serde_json::to_string_pretty(state)
            .map_err(|err| FlowError::corrupt(format!("serialize state: {err}")))?;
        buf.push('\n');
        debug!(path = %path.display(), phase = %state.phase, "writing state");
        self.ws
            .fs()
            .write_atomic(path, &buf)
            .map_err(fs_error("write state", path.as_path()))
    }

    /// Delete the state file. Returns whether one existed.
    pub fn remove(&self) -> Result<bool> {
        let path = &self.ws.paths().state_path;
        match self.ws.fs().remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(fs_error("remove state", path.as_path())(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::Phase;
    use crate::test_support::TestWorkspace;

    #[test]
    fn save_load_remove() {
        let tw = TestWorkspace::new();
        let store = StateStore::new(tw.ws());
        assert!(store.load().expect("load").is_none());

        let mut state = PhaseState::new(Phase::Implement, tw.clock().now());
        state.current_task = Some("auth.login".to_string());
        store.save(&state).expect("save");
        assert_eq!(store.load().expect("load"), Some(state));

        assert!(store.remove().expect("remove"));
        assert!(!store.remove().expect("remove again"));
    }

    #[test]
    fn garbage_is_corrupt_state() {
        let tw = TestWorkspace::new();
        std::fs::write(&tw.ws().paths().state_path, "phase: nope").expect("write");
        let err = StateStore::new(tw.ws()).load().unwrap_err();
        assert!(matches!(err, FlowError::CorruptState(_)));
    }
}

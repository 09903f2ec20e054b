//! Breaker snapshots under `.flow/breakers/<name>.json`.

use std::io;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::breaker::BreakerSnapshot;
use crate::error::{FlowError, Result, fs_error};
use crate::workspace::Workspace;

static BREAKER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("breaker name pattern is valid")
});

pub fn validate_breaker_name(name: &str) -> Result<()> {
    if BREAKER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(FlowError::validation(format!(
            "breaker name '{name}' must be alphanumeric with '-' or '_'"
        )))
    }
}

pub struct BreakerStore<'a> {
    ws: &'a Workspace,
}

impl<'a> BreakerStore<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self { ws }
    }

    /// Stored snapshot, or a fresh closed breaker.
    pub fn load(&self, name: &str) -> Result<BreakerSnapshot> {
        validate_breaker_name(name)?;
        let path = self.ws.paths().breaker_path(name);
        let contents = match self.ws.fs().read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(BreakerSnapshot::default());
            }
            Err(err) => return Err(fs_error("read breaker", path)(err)),
        };
        serde_json::from_str(&contents)
            .map_err(|err| FlowError::corrupt(format!("parse {}: {err}", path.display())))
    }

    pub fn save(&self, name: &str, snapshot: &BreakerSnapshot) -> Result<()> {
        validate_breaker_name(name)?;
        let path = self.ws.paths().breaker_path(name);
        let mut buf = serde_json::to_string_pretty(snapshot)
            .map_err(|err| FlowError::corrupt(format!("serialize breaker: {err}")))?;
        buf.push('\n');
        debug!(breaker = name, state = ?snapshot.state, "writing breaker");
        self.ws
            .fs()
            .write_atomic(&path, &buf)
            .map_err(fs_error("write breaker", path.as_path()))
    }
}

//! Workspace configuration stored under `.flow/config.toml`.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::breaker::BreakerConfig;
use crate::core::retry::RetryPolicy;
use crate::error::{FlowError, Result, fs_error};
use crate::io::fs::FileSystem;

/// Workspace configuration (TOML).
///
/// Meant to be edited by humans; every field has a default so a partial or
/// missing file still loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Bounds on automatic repair attempts.
    pub breaker: BreakerConfig,
    /// Backoff for transient filesystem errors.
    pub retry: RetryPolicy,
}

impl FlowConfig {
    pub fn validate(&self) -> Result<()> {
        self.breaker.validate()?;
        self.retry.validate()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FlowConfig::default()`.
pub fn load_config(fs: &dyn FileSystem, path: &Path) -> Result<FlowConfig> {
    let contents = match fs.read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(FlowConfig::default());
        }
        Err(err) => return Err(fs_error("read config", path)(err)),
    };
    let cfg: FlowConfig = toml::from_str(&contents)
        .map_err(|err| FlowError::validation(format!("parse {}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(fs: &dyn FileSystem, path: &Path, cfg: &FlowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg)
        .map_err(|err| FlowError::validation(format!("serialize config: {err}")))?;
    buf.push('\n');
    fs.write_atomic(path, &buf)
        .map_err(fs_error("write config", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fs::LocalFs;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&LocalFs::default(), &temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FlowConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let fs = LocalFs::default();
        let mut cfg = FlowConfig::default();
        cfg.breaker.failure_threshold = 5;
        cfg.retry.backoff_multiplier = 1.5;
        write_config(&fs, &path, &cfg).expect("write");
        assert_eq!(load_config(&fs, &path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[breaker]\ntimeout_ms = 1000\n").expect("write");
        let cfg = load_config(&LocalFs::default(), &path).expect("load");
        assert_eq!(cfg.breaker.timeout_ms, 1000);
        assert_eq!(cfg.breaker.failure_threshold, 3);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").expect("write");
        let err = load_config(&LocalFs::default(), &path).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }
}

//! Workspace layout and `.flow/` scaffolding.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{FlowError, Result, fs_error};
use crate::io::config::{FlowConfig, write_config};
use crate::io::fs::FileSystem;

/// Name of the workspace directory under the project root.
pub const FLOW_DIR: &str = ".flow";

/// All canonical paths within `.flow/` for a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPaths {
    pub root: PathBuf,
    pub flow_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub index_path: PathBuf,
    pub state_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub breakers_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub events_path: PathBuf,
    pub archive_dir: PathBuf,
}

impl FlowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let flow_dir = root.join(FLOW_DIR);
        let logs_dir = flow_dir.join("logs");
        Self {
            root,
            gitignore_path: flow_dir.join(".gitignore"),
            config_path: flow_dir.join("config.toml"),
            index_path: flow_dir.join("index.json"),
            state_path: flow_dir.join("state.json"),
            tasks_dir: flow_dir.join("tasks"),
            breakers_dir: flow_dir.join("breakers"),
            events_path: logs_dir.join("events.jsonl"),
            logs_dir,
            archive_dir: flow_dir.join("archive"),
            flow_dir,
        }
    }

    /// Record location relative to `.flow/`, as stored in the index.
    pub fn record_location(module: &str, name: &str) -> String {
        format!("tasks/{module}/{name}.md")
    }

    /// Absolute path for a location produced by [`Self::record_location`].
    pub fn resolve(&self, location: &str) -> PathBuf {
        self.flow_dir.join(location)
    }

    pub fn breaker_path(&self, name: &str) -> PathBuf {
        self.breakers_dir.join(format!("{name}.json"))
    }
}

/// Options for [`init_layout`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Rewrite config and `.gitignore` on an existing workspace.
    pub force: bool,
}

/// Create the `.flow/` directory tree, default config and `.gitignore`.
///
/// Fails if the workspace already exists unless `options.force` is set.
/// Tasks and the index are never touched here.
pub fn init_layout(fs: &dyn FileSystem, paths: &FlowPaths, options: &InitOptions) -> Result<()> {
    if fs.exists(&paths.flow_dir) {
        if !fs.is_dir(&paths.flow_dir) {
            return Err(FlowError::validation(format!(
                "{} exists but is not a directory",
                paths.flow_dir.display()
            )));
        }
        if !options.force {
            return Err(FlowError::validation(format!(
                "{} already exists (use --force to rewrite config)",
                paths.flow_dir.display()
            )));
        }
        debug!(dir = %paths.flow_dir.display(), "re-initializing workspace");
    }

    for dir in [
        &paths.flow_dir,
        &paths.tasks_dir,
        &paths.breakers_dir,
        &paths.logs_dir,
    ] {
        fs.ensure_dir(dir)
            .map_err(fs_error("create directory", dir.as_path()))?;
    }
    fs.write_atomic(&paths.gitignore_path, FLOW_GITIGNORE)
        .map_err(fs_error("write", paths.gitignore_path.as_path()))?;
    write_config(fs, &paths.config_path, &FlowConfig::default())?;

    info!(dir = %paths.flow_dir.display(), "workspace layout created");
    Ok(())
}

/// Is there a workspace at `root`?
pub fn is_initialized(fs: &dyn FileSystem, root: &Path) -> bool {
    fs.is_dir(&root.join(FLOW_DIR))
}

const FLOW_GITIGNORE: &str = "archive/\nlogs/\n";

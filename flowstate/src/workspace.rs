//! Service context for one `.flow/` workspace.
//!
//! A [`Workspace`] bundles the resolved paths, the loaded config and the
//! two ports (filesystem, clock). Services borrow it for the duration of a
//! single operation and keep nothing between invocations.

use std::path::Path;

use tracing::{debug, info};

use crate::core::phase::Phase;
use crate::error::{FlowError, Result};
use crate::heal::HealGate;
use crate::io::clock::{Clock, SystemClock};
use crate::io::config::{FlowConfig, load_config};
use crate::io::event_log::EventLog;
use crate::io::fs::{FileSystem, LocalFs};
use crate::io::index_store::IndexStore;
use crate::io::init::{FlowPaths, InitOptions, init_layout, is_initialized};
use crate::state::StateService;
use crate::tasks::TaskService;

/// Options for [`Workspace::init`].
#[derive(Debug, Clone, Default)]
pub struct WorkspaceInit {
    pub layout: InitOptions,
    /// Also initialize the phase state in this phase.
    pub phase: Option<Phase>,
}

pub struct Workspace {
    paths: FlowPaths,
    config: FlowConfig,
    fs: Box<dyn FileSystem>,
    clock: Box<dyn Clock>,
}

impl Workspace {
    /// Open an existing workspace under `root` with the local disk and system clock.
    pub fn open(root: &Path) -> Result<Self> {
        let bootstrap = LocalFs::default();
        if !is_initialized(&bootstrap, root) {
            return Err(FlowError::validation(format!(
                "no workspace at {} (run `flowstate init` first)",
                root.display()
            )));
        }
        let paths = FlowPaths::new(root);
        let config = load_config(&bootstrap, &paths.config_path)?;
        debug!(root = %root.display(), "workspace opened");
        let fs = LocalFs::new(config.retry.clone());
        Ok(Self::from_parts(paths, config, Box::new(fs), Box::new(SystemClock)))
    }

    /// Create the layout, an empty index and optionally the phase state, then open it.
    pub fn init(root: &Path, options: &WorkspaceInit) -> Result<Self> {
        init_layout(&LocalFs::default(), &FlowPaths::new(root), &options.layout)?;
        let ws = Self::open(root)?;
        ws.bootstrap(options.phase)?;
        Ok(ws)
    }

    pub fn from_parts(
        paths: FlowPaths,
        config: FlowConfig,
        fs: Box<dyn FileSystem>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            paths,
            config,
            fs,
            clock,
        }
    }

    /// Write the empty index and, when asked, the initial phase state.
    pub fn bootstrap(&self, phase: Option<Phase>) -> Result<()> {
        IndexStore::new(self).read()?;
        if let Some(phase) = phase {
            self.state().initialize_state(phase)?;
        }
        info!(root = %self.paths.root.display(), phase = ?phase, "workspace initialized");
        self.events().record("workspace.init", None, None);
        Ok(())
    }

    pub fn paths(&self) -> &FlowPaths {
        &self.paths
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn tasks(&self) -> TaskService<'_> {
        TaskService::new(self)
    }

    pub fn state(&self) -> StateService<'_> {
        StateService::new(self)
    }

    pub fn heal(&self) -> HealGate<'_> {
        HealGate::new(self)
    }

    pub fn events(&self) -> EventLog<'_> {
        EventLog::new(self)
    }
}

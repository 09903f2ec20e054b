//! Test-only helpers: a temp workspace with a pinned clock, and task builders.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::task::{NewTask, Task};
use crate::io::clock::Clock;
use crate::io::config::FlowConfig;
use crate::io::fs::LocalFs;
use crate::io::init::{FlowPaths, InitOptions, init_layout};
use crate::workspace::Workspace;

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance_ms(&self, ms: i64) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += Duration::milliseconds(ms);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1000);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(epoch())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        ManualClock::now(self)
    }
}

/// Fixed start time for deterministic tests.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// An initialized workspace in a temp directory, driven by a [`ManualClock`].
pub struct TestWorkspace {
    temp: TempDir,
    clock: ManualClock,
    ws: Workspace,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = FlowPaths::new(temp.path());
        let fs = LocalFs::new(config.retry.clone());
        init_layout(&fs, &paths, &InitOptions::default()).expect("init layout");
        let clock = ManualClock::default();
        let ws = Workspace::from_parts(paths, config, Box::new(fs), Box::new(clock.clone()));
        Self { temp, clock, ws }
    }

    pub fn ws(&self) -> &Workspace {
        &self.ws
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp.path()
    }

    /// Build a task stamped with the workspace clock.
    pub fn build_task(&self, spec: NewTask, sequence: u64) -> Task {
        Task::new(spec, sequence, self.clock.now()).expect("valid task spec")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal valid task spec.
pub fn new_task(id: &str, priority: i64, dependencies: &[&str]) -> NewTask {
    NewTask {
        id: id.to_string(),
        priority,
        description: format!("{id} description"),
        dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
        ..NewTask::default()
    }
}

/// Task spec with every optional field populated.
pub fn detailed_task(id: &str) -> NewTask {
    NewTask {
        estimated_minutes: Some(45),
        acceptance_criteria: vec![
            "returns 200 for valid input".to_string(),
            "rejects empty payloads".to_string(),
        ],
        test_requirements: Some(crate::core::task::TestRequirement {
            pattern: format!("tests/{}_*.rs", id.replace('.', "_")),
            required: true,
        }),
        ..new_task(id, 2, &[])
    }
}

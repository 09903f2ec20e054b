//! Index load/save with schema validation.

use std::io;

use jsonschema::validator_for;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::index::Index;
use crate::error::{FlowError, Result, fs_error};
use crate::workspace::Workspace;

const INDEX_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/index.v1.schema.json"
));

pub struct IndexStore<'a> {
    ws: &'a Workspace,
}

impl<'a> IndexStore<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self { ws }
    }

    /// Load the index, creating an empty one on first use.
    pub fn read(&self) -> Result<Index> {
        if let Some(index) = self.load_existing()? {
            return Ok(index);
        }
        let mut index = Index::empty(self.ws.now());
        info!(path = %self.ws.paths().index_path.display(), "bootstrapping empty index");
        self.write(&mut index)?;
        Ok(index)
    }

    /// Load the index without bootstrapping it.
    pub fn load_existing(&self) -> Result<Option<Index>> {
        let path = &self.ws.paths().index_path;
        let contents = match self.ws.fs().read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(fs_error("read index", path.as_path())(err)),
        };
        let index = parse_index(&contents)?;
        debug!(tasks = index.tasks.len(), "index loaded");
        Ok(Some(index))
    }

    /// Stamp `updated_at` and replace the index atomically.
    pub fn write(&self, index: &mut Index) -> Result<()> {
        index.updated_at = self.ws.now();
        self.restore(index)
    }

    /// Replace the index with `index` exactly as given (used for rollback).
    pub fn restore(&self, index: &Index) -> Result<()> {
        let path = &self.ws.paths().index_path;
        let mut buf = serde_json::to_string_pretty(index)
            .map_err(|err| FlowError::corrupt(format!("serialize index: {err}")))?;
        buf.push('\n');
        debug!(path = %path.display(), tasks = index.tasks.len(), "writing index");
        self.ws
            .fs()
            .write_atomic(path, &buf)
            .map_err(fs_error("write index", path.as_path()))
    }

    /// Merge `patch` into the metadata without touching other keys.
    pub fn update_metadata(&self, patch: &Map<String, Value>) -> Result<Index> {
        let mut index = self.read()?;
        index.metadata = index.metadata.merge(patch)?;
        self.write(&mut index)?;
        info!(keys = ?patch.keys().collect::<Vec<_>>(), "index metadata updated");
        Ok(index)
    }
}

/// Parse and schema-check an index document.
pub fn parse_index(contents: &str) -> Result<Index> {
    let value: Value = serde_json::from_str(contents)
        .map_err(|err| FlowError::corrupt(format!("parse index json: {err}")))?;
    validate_schema(&value)?;
    serde_json::from_value(value)
        .map_err(|err| FlowError::corrupt(format!("deserialize index: {err}")))
}

fn validate_schema(index: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(INDEX_SCHEMA)
        .map_err(|err| FlowError::corrupt(format!("parse index schema: {err}")))?;
    let compiled = validator_for(&schema)
        .map_err(|err| FlowError::corrupt(format!("invalid index schema: {err}")))?;
    if compiled.is_valid(index) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(index)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(FlowError::corrupt(format!(
        "index schema validation failed: {}",
        messages.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestWorkspace;
    use serde_json::json;

    #[test]
    fn read_bootstraps_once() {
        let tw = TestWorkspace::new();
        let store = IndexStore::new(tw.ws());
        assert!(store.load_existing().expect("load").is_none());

        let first = store.read().expect("read");
        assert!(first.tasks.is_empty());
        assert!(tw.ws().paths().index_path.is_file());

        tw.clock().advance_secs(60);
        let second = store.read().expect("read again");
        assert_eq!(first, second);
    }

    #[test]
    fn write_stamps_updated_at() {
        let tw = TestWorkspace::new();
        let store = IndexStore::new(tw.ws());
        let mut index = store.read().expect("read");
        tw.clock().advance_secs(5);
        store.write(&mut index).expect("write");
        assert_eq!(index.updated_at, tw.clock().now());
        assert_eq!(store.read().expect("read").updated_at, tw.clock().now());
    }

    #[test]
    fn update_metadata_merges() {
        let tw = TestWorkspace::new();
        let store = IndexStore::new(tw.ws());
        store
            .update_metadata(json!({"projectGoal": "ship"}).as_object().unwrap())
            .expect("goal");
        let index = store
            .update_metadata(json!({"languageConfig": {"test": "cargo test"}}).as_object().unwrap())
            .expect("language");
        assert_eq!(index.metadata.project_goal.as_deref(), Some("ship"));
        assert_eq!(
            index.metadata.language_config,
            Some(json!({"test": "cargo test"}))
        );
    }

    #[test]
    fn schema_violations_are_corrupt_state() {
        let bad = json!({
            "version": 1,
            "updatedAt": "2026-01-01T00:00:00Z",
            "tasks": {"a.b": {"status": "done", "priority": 0, "module": "a",
                              "description": "", "file": "tasks/a/b.md", "sequence": 1}}
        });
        let err = parse_index(&bad.to_string()).unwrap_err();
        assert!(matches!(err, FlowError::CorruptState(_)));
        assert!(err.to_string().contains("schema validation failed"));

        assert!(matches!(parse_index("{not json"), Err(FlowError::CorruptState(_))));
    }
}

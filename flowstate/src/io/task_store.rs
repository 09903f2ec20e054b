//! Task records under `.flow/tasks/<module>/<name>.md`, kept in step with the index.
//!
//! Every mutation writes the authoritative record first and the index
//! second. A record that exists without an index row is re-indexed on
//! lookup; an index row without a record is reported as corrupt state.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::index::{Index, TaskSummary};
use crate::core::query::{ListQuery, TaskFilter, select};
use crate::core::record::{parse_record, render_record};
use crate::core::task::{Task, split_id};
use crate::error::{FlowError, Result, fs_error};
use crate::io::index_store::IndexStore;
use crate::io::init::FlowPaths;
use crate::workspace::Workspace;

/// Result of [`TaskStore::rebuild_index`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub indexed: usize,
    /// Records that had no index row before the rebuild.
    pub added: Vec<String>,
    /// Index rows that had no record and were removed.
    pub dropped: Vec<String>,
}

/// Result of [`TaskStore::check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub ok: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct TaskStore<'a> {
    ws: &'a Workspace,
    index: IndexStore<'a>,
}

impl<'a> TaskStore<'a> {
    pub fn new(ws: &'a Workspace) -> Self {
        Self {
            ws,
            index: IndexStore::new(ws),
        }
    }

    pub fn index(&self) -> &IndexStore<'a> {
        &self.index
    }

    /// Location (relative to `.flow/`) a task id maps to.
    pub fn location_for(id: &str) -> Result<String> {
        let (module, name) = split_id(id)?;
        Ok(FlowPaths::record_location(module, name))
    }

    /// Write the record, then reflect it in the index.
    pub fn save(&self, task: &Task) -> Result<()> {
        let mut index = self.index.read()?;
        self.save_with_index(task, &mut index)
    }

    /// [`Self::save`] against an index the caller already loaded; `index` is updated in place.
    pub fn save_with_index(&self, task: &Task, index: &mut Index) -> Result<()> {
        let location = self.write_record(task)?;
        index.upsert(task, location);
        self.index.write(index)?;
        debug!(task_id = %task.id, status = %task.status, "task saved");
        Ok(())
    }

    /// Look a task up by id. `Ok(None)` when no record exists.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let location = Self::location_for(id)?;
        let mut index = self.index.read()?;

        if let Some(summary) = index.tasks.get(id) {
            let path = self.ws.paths().resolve(&summary.file);
            let task = self.read_record(&path)?.ok_or_else(|| {
                FlowError::corrupt(format!(
                    "index entry '{id}' points to missing record {}",
                    path.display()
                ))
            })?;
            check_identity(id, &task)?;
            return Ok(Some(task));
        }

        let path = self.ws.paths().resolve(&location);
        let Some(task) = self.read_record(&path)? else {
            return Ok(None);
        };
        check_identity(id, &task)?;
        warn!(task_id = %id, "record missing from index, re-indexing");
        index.upsert(&task, location);
        self.index.write(&mut index)?;
        Ok(Some(task))
    }

    /// Like [`Self::find_by_id`] but absence is an error.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.find_by_id(id)?
            .ok_or_else(|| FlowError::not_found("task", id))
    }

    /// Remove the record and its index row.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut index = self.index.read()?;
        let location = match index.tasks.get(id) {
            Some(summary) => summary.file.clone(),
            None => Self::location_for(id)?,
        };
        let path = self.ws.paths().resolve(&location);
        let had_row = index.remove(id).is_some();
        let had_record = match self.ws.fs().remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(fs_error("remove record", path)(err)),
        };
        if !had_row && !had_record {
            return Err(FlowError::not_found("task", id));
        }
        if had_row {
            self.index.write(&mut index)?;
        }
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Tasks matching `filter`, by ascending priority then creation order.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let index = self.index.read()?;
        let selection = select(
            &index,
            &ListQuery {
                filter: filter.clone(),
                ..ListQuery::default()
            },
        );
        self.load_many(&index, &selection.ids)
    }

    /// Load the records behind `ids`, which must all be indexed.
    pub fn load_many(&self, index: &Index, ids: &[String]) -> Result<Vec<Task>> {
        ids.iter()
            .map(|id| {
                let summary = index
                    .tasks
                    .get(id)
                    .ok_or_else(|| FlowError::not_found("task", id.as_str()))?;
                let path = self.ws.paths().resolve(&summary.file);
                let task = self.read_record(&path)?.ok_or_else(|| {
                    FlowError::corrupt(format!(
                        "index entry '{id}' points to missing record {}",
                        path.display()
                    ))
                })?;
                check_identity(id, &task)?;
                Ok(task)
            })
            .collect()
    }

    /// Put a record back to a captured state: rewrite it, or remove it if it did not exist.
    pub fn restore_record(&self, id: &str, before: Option<&Task>) -> Result<()> {
        match before {
            Some(task) => self.write_record(task).map(|_| ()),
            None => {
                let path = self.ws.paths().resolve(&Self::location_for(id)?);
                match self.ws.fs().remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(fs_error("remove record", path)(err)),
                }
            }
        }
    }

    /// Every record on disk, keyed by its location. Unparseable records are returned as errors.
    pub fn scan_records(&self) -> Result<Vec<(String, Result<Task>)>> {
        let fs = self.ws.fs();
        let tasks_dir = &self.ws.paths().tasks_dir;
        if !fs.is_dir(tasks_dir) {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        let modules = fs
            .list_dir(tasks_dir)
            .map_err(fs_error("list tasks", tasks_dir.as_path()))?;
        for module in modules {
            let module_dir = tasks_dir.join(&module);
            if !fs.is_dir(&module_dir) {
                continue;
            }
            let files = fs
                .list_dir(&module_dir)
                .map_err(fs_error("list module", module_dir.as_path()))?;
            for file in files {
                let Some(name) = file.strip_suffix(".md") else {
                    continue;
                };
                let location = FlowPaths::record_location(&module, name);
                let path = module_dir.join(&file);
                let parsed = self.read_record(&path).and_then(|task| {
                    task.ok_or_else(|| FlowError::corrupt(format!("{} vanished", path.display())))
                });
                found.push((location, parsed));
            }
        }
        Ok(found)
    }

    /// Rebuild the index from the records, keeping metadata.
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let previous = match self.index.load_existing() {
            Ok(previous) => previous,
            Err(FlowError::CorruptState(reason)) => {
                warn!(%reason, "existing index unreadable, rebuilding from scratch");
                None
            }
            Err(err) => return Err(err),
        };
        let now = self.ws.now();
        let mut index = Index::empty(now);
        if let Some(previous) = &previous {
            index.metadata = previous.metadata.clone();
            index.next_sequence = previous.next_sequence;
        }

        for (location, parsed) in self.scan_records()? {
            let task = parsed.map_err(|err| {
                FlowError::corrupt(format!("cannot rebuild index, record {location}: {err}"))
            })?;
            let expected = Self::location_for(&task.id)?;
            if expected != location {
                return Err(FlowError::corrupt(format!(
                    "record {location} holds task '{}' which belongs at {expected}",
                    task.id
                )));
            }
            index.upsert(&task, location);
        }

        let before: BTreeSet<&String> = previous
            .as_ref()
            .map(|p| p.tasks.keys().collect())
            .unwrap_or_default();
        let after: BTreeSet<&String> = index.tasks.keys().collect();
        let report = RebuildReport {
            indexed: index.tasks.len(),
            added: after.difference(&before).map(|id| id.to_string()).collect(),
            dropped: before.difference(&after).map(|id| id.to_string()).collect(),
        };

        self.index.write(&mut index)?;
        info!(
            indexed = report.indexed,
            added = report.added.len(),
            dropped = report.dropped.len(),
            "index rebuilt"
        );
        Ok(report)
    }

    /// Compare the index against the records without changing either.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let index = self.index.read()?;
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut seen = BTreeSet::new();

        for (location, parsed) in self.scan_records()? {
            let task = match parsed {
                Ok(task) => task,
                Err(err) => {
                    issues.push(format!("{location}: unreadable record ({err})"));
                    continue;
                }
            };
            match Self::location_for(&task.id) {
                Ok(expected) if expected == location => {}
                Ok(expected) => issues.push(format!(
                    "{location}: holds task '{}' which belongs at {expected}",
                    task.id
                )),
                Err(err) => issues.push(format!("{location}: {err}")),
            }
            match index.tasks.get(&task.id) {
                None => issues.push(format!("{}: record is not in the index", task.id)),
                Some(summary) => {
                    let expected = TaskSummary::from_task(&task, location.clone());
                    for drift in describe_drift(summary, &expected) {
                        issues.push(format!("{}: {drift}", task.id));
                    }
                }
            }
            seen.insert(task.id.clone());
        }

        for (id, summary) in &index.tasks {
            if !seen.contains(id) {
                issues.push(format!("{id}: index entry has no record at {}", summary.file));
            }
            for dep in &summary.dependencies {
                if !index.tasks.contains_key(dep) {
                    warnings.push(format!("{id}: depends on unknown task '{dep}'"));
                }
            }
        }

        Ok(IntegrityReport {
            ok: issues.is_empty(),
            issues,
            warnings,
        })
    }

    /// Write the record for `task` and return its location.
    fn write_record(&self, task: &Task) -> Result<String> {
        let location = Self::location_for(&task.id)?;
        let path = self.ws.paths().resolve(&location);
        let contents = render_record(task)?;
        self.ws
            .fs()
            .write_atomic(&path, &contents)
            .map_err(fs_error("write record", path.as_path()))?;
        Ok(location)
    }

    fn read_record(&self, path: &Path) -> Result<Option<Task>> {
        let contents = match self.ws.fs().read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(fs_error("read record", path)(err)),
        };
        parse_record(&contents)
            .map(Some)
            .map_err(|err| FlowError::corrupt(format!("{}: {err}", path.display())))
    }
}

fn check_identity(id: &str, task: &Task) -> Result<()> {
    if task.id == id {
        Ok(())
    } else {
        Err(FlowError::corrupt(format!(
            "record for '{id}' contains task '{}'",
            task.id
        )))
    }
}

fn describe_drift(indexed: &TaskSummary, actual: &TaskSummary) -> Vec<String> {
    let mut drift = Vec::new();
    if indexed.status != actual.status {
        drift.push(format!(
            "status drift (index {}, record {})",
            indexed.status, actual.status
        ));
    }
    if indexed.priority != actual.priority {
        drift.push(format!(
            "priority drift (index {}, record {})",
            indexed.priority, actual.priority
        ));
    }
    if indexed.file != actual.file {
        drift.push(format!(
            "location drift (index {}, record {})",
            indexed.file, actual.file
        ));
    }
    if indexed.dependencies != actual.dependencies {
        drift.push("dependency drift".to_string());
    }
    if indexed.sequence != actual.sequence {
        drift.push(format!(
            "sequence drift (index {}, record {})",
            indexed.sequence, actual.sequence
        ));
    }
    drift
}

//! Filesystem port and the local-disk adapter.
//!
//! Stores only ever reach the disk through [`FileSystem`]. Whole-file writes
//! are atomic (temp file + rename), so a reader never sees a half-written
//! document; that is the only cross-process concurrency control.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::core::retry::RetryPolicy;
use crate::io::clock::ThreadSleeper;

pub trait FileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace `path` atomically, creating parent directories as needed.
    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Append to `path`, creating it (and its parents) if missing.
    fn append(&self, path: &Path, contents: &str) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Move a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Sorted entry names of a directory.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    fn is_dir(&self, path: &Path) -> bool;
}

/// Local disk adapter. Mutations are retried on transient errors.
#[derive(Debug, Clone)]
pub struct LocalFs {
    retry: RetryPolicy,
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl LocalFs {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    fn retrying<T>(&self, what: &str, path: &Path, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        self.retry.run_if(&ThreadSleeper, is_transient, |attempt| {
            let result = op();
            if let Err(err) = &result
                && is_transient(err)
                && attempt < self.retry.max_attempts
            {
                warn!(path = %path.display(), attempt, error = %err, "{what} failed, retrying");
            }
            result
        })
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl FileSystem for LocalFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.retrying("read", path, || fs::read_to_string(path))
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
        })?;
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let tmp_path = parent.join(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            std::process::id()
        ));
        debug!(path = %path.display(), bytes = contents.len(), "atomic write");
        self.retrying("write", path, || {
            fs::create_dir_all(parent)?;
            fs::write(&tmp_path, contents)?;
            fs::rename(&tmp_path, path)
        })
        .inspect_err(|_| {
            let _ = fs::remove_file(&tmp_path);
        })
    }

    fn append(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.retrying("append", path, || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(contents.as_bytes())
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        self.retrying("create directory", path, || fs::create_dir_all(path))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.retrying("remove", path, || fs::remove_file(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.retrying("rename", from, || {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(from, to)
        })
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

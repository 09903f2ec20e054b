//! Error taxonomy shared by the core, the stores and the services.
//!
//! Repositories wrap raw I/O failures as [`FlowError::FileSystem`]; services
//! translate rule violations into the specific variants below. "No eligible
//! task" and "archive blocked" are result values, never errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// A task, the phase state, or another addressable entity is absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Task creation conflicted with an existing id.
    #[error("task '{0}' already exists")]
    DuplicateId(String),

    /// An illegal status or phase change was requested.
    #[error("cannot {action} {entity} '{id}': current {from}, requested {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        action: String,
        from: String,
        to: String,
    },

    /// Malformed input rejected before anything was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The index and the task records disagree, or a file is unreadable.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("{action} {}: {source}", path.display())]
    FileSystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FlowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptState(message.into())
    }

    /// Stable machine-readable code for JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CorruptState(_) => "CORRUPT_STATE",
            Self::FileSystem { .. } => "FILE_SYSTEM_ERROR",
        }
    }
}

/// Build a `map_err` adapter that wraps an I/O error with the failed action and path.
pub(crate) fn fs_error(
    action: &'static str,
    path: impl Into<PathBuf>,
) -> impl FnOnce(io::Error) -> FlowError {
    let path = path.into();
    move |source| FlowError::FileSystem {
        action,
        path,
        source,
    }
}

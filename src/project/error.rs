//! Errors raised by project loading and build-file edits.

use std::path::PathBuf;
use thiserror::Error;

use crate::evaluation::EvaluationError;
use crate::types::NodeId;
use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unknown unit {0}")]
    UnknownUnit(NodeId),

    #[error("Unit {0} is not a .pro unit")]
    NotAProUnit(NodeId),

    #[error("No unit is built from '{0}'")]
    NoUnitForFile(PathBuf),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Why a build-file rewrite was abandoned before or while touching disk.
#[derive(Error, Debug)]
pub enum EditError {
    #[error("Unsaved changes in '{0}' were not saved; edit cancelled")]
    SaveCancelled(PathBuf),

    #[error("Failed to make '{path}' writable: {reason}")]
    NotWritable { path: PathBuf, reason: String },

    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path for this edit: '{0}'")]
    InvalidPath(PathBuf),
}

impl EditError {
    /// Message suitable for showing to a user as-is.
    pub fn user_message(&self) -> String {
        match self {
            Self::SaveCancelled(_) => "The build file has unsaved changes.".to_string(),
            Self::NotWritable { path, .. } => {
                format!("'{}' is read-only and could not be opened for editing.", path.display())
            }
            other => other.to_string(),
        }
    }
}

pub type ProjectResult<T> = Result<T, ProjectError>;
pub type EditResult<T> = Result<T, EditError>;

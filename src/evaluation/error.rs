//! Errors raised while reading and evaluating build files.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Include of '{path}' is recursive")]
    RecursiveInclude { path: PathBuf },

    #[error("Include file '{path}' not found")]
    MissingInclude { path: PathBuf },

    #[error("{path}: error(): {message}")]
    Aborted { path: PathBuf, message: String },

    #[error("Evaluation worker pool could not be built: {0}")]
    Pool(String),
}

impl EvaluationError {
    /// Whether the error stops the whole evaluation rather than a branch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Syntax { .. } | Self::Aborted { .. } | Self::Pool(_)
        )
    }
}

pub type EvaluationResult<T> = Result<T, EvaluationError>;

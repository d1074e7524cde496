//! Why a QML module's type information could not be produced.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DumpError {
    #[error("\"{program}\" failed to start: {reason}")]
    FailedToStart { program: String, reason: String },

    #[error("\"{program}\" crashed.")]
    Crashed { program: String },

    #[error("\"{program}\" timed out after {seconds} s.")]
    TimedOut { program: String, seconds: u64 },

    #[error("\"{program}\" returned exit code {code}.")]
    ExitCode { program: String, code: i32 },

    #[error("Failed to read '{path}': {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Failed to parse '{path}'.\nError: {message}")]
    TypeInfo { path: String, message: String },

    #[error(
        "Could not locate the helper application for dumping type information from C++ plugins."
    )]
    NoHelper,
}

pub type DumpResult<T> = Result<T, DumpError>;

/// Shown for a module whose plugins ship no type information.
pub fn no_type_info_message(library: &std::path::Path) -> String {
    format!(
        "QML module does not contain information about components contained in plugins\n\n\
         Module path: {}\n\
         See \"Using QML Modules with Plugins\" in the documentation.",
        library.display()
    )
}

/// Full message for a failed automatic dump.
pub fn dump_error_message(library: &std::path::Path, errors: &str) -> String {
    format!(
        "{}\n\nAutomatic type dump of QML module failed.\nErrors:\n{errors}\n",
        no_type_info_message(library)
    )
}

/// Short form kept on the library: only the first ten lines of output.
pub fn dump_failed_message(library: &std::path::Path, errors: &str) -> String {
    let first_lines: Vec<&str> = errors.lines().take(10).collect();
    format!(
        "{}\n\nAutomatic type dump of QML module failed.\nFirst 10 lines or errors:\n\n{}",
        no_type_info_message(library),
        first_lines.join("\n")
    )
}

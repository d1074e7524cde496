//! Hooks into whatever holds build files open, and the disk write itself.

use std::io::Write as _;
use std::path::Path;

use crate::project::{EditError, EditResult};

/// An editor session that may hold a build file open.
///
/// The defaults describe a host with no open documents.
pub trait DocumentHost: Send + Sync {
    /// Whether an open editor has unsaved changes to `path`.
    fn is_modified(&self, _path: &Path) -> bool {
        false
    }

    /// Ask to save unsaved changes. `false` means the user refused.
    fn save_modified(&self, _path: &Path) -> bool {
        true
    }

    /// The next on-disk change to `path` comes from us.
    fn expect_change(&self, _path: &Path) {}

    fn unexpect_change(&self, _path: &Path) {}

    /// Re-read `path` into any open editor.
    fn reload(&self, _path: &Path) -> Result<(), String> {
        Ok(())
    }
}

/// No editors; used by the CLI and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDocuments;

impl DocumentHost for HeadlessDocuments {}

/// Checkout hook for files under version control.
pub trait VersionControl: Send + Sync {
    fn manages(&self, path: &Path) -> bool;

    fn open_for_edit(&self, path: &Path) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoVersionControl;

impl VersionControl for NoVersionControl {
    fn manages(&self, _path: &Path) -> bool {
        false
    }

    fn open_for_edit(&self, _path: &Path) -> Result<(), String> {
        Ok(())
    }
}

/// Make `path` writable: version-control checkout first, then a plain
/// permission change.
pub fn ensure_writable(path: &Path, vcs: &dyn VersionControl) -> EditResult<()> {
    let metadata = std::fs::metadata(path).map_err(|source| EditError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.permissions().readonly() {
        return Ok(());
    }

    if vcs.manages(path) {
        match vcs.open_for_edit(path) {
            Ok(()) if !is_readonly(path) => return Ok(()),
            Ok(()) => {}
            Err(e) => tracing::warn!(target: "writer", "checkout of {} failed: {e}", path.display()),
        }
    }

    let mut permissions = metadata.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    std::fs::set_permissions(path, permissions).map_err(|e| EditError::NotWritable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn is_readonly(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true)
}

/// Replace `path` with `contents` through a temp file in the same directory.
pub fn write_atomic(path: &Path, contents: &str) -> EditResult<()> {
    let io_err = |source| EditError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    let permissions = std::fs::metadata(path).map(|m| m.permissions()).ok();

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(contents.as_bytes()).map_err(io_err)?;
    temp.flush().map_err(io_err)?;
    if let Some(permissions) = permissions {
        temp.as_file().set_permissions(permissions).map_err(io_err)?;
    }
    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

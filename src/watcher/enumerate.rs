//! Recursive listing of deployed folders.

use std::path::Path;
use walkdir::WalkDir;

use crate::fileset::PathSet;

/// Editor crash-recovery copies, never part of a project.
pub fn is_auto_save_file(name: &str) -> bool {
    name.ends_with(".autosave")
}

/// Every non-directory entry below `folder`.
///
/// Symlinked directories are listed as entries, not descended into. A
/// `folder` that is a plain file yields just itself; a missing one yields
/// nothing.
pub fn recursive_enumerate(folder: &Path) -> PathSet {
    let mut result = PathSet::new();
    if !folder.is_dir() {
        if folder.exists() {
            result.insert(folder.to_path_buf());
        }
        return result;
    }

    for entry in WalkDir::new(folder)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!("[watcher] skipping unreadable entry: {err}");
                None
            }
        })
    {
        if entry.file_type().is_dir() {
            continue;
        }
        if is_auto_save_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        result.insert(entry.into_path());
    }
    result
}

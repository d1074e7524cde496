//! Set differences between two snapshots of filesystem paths.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub type PathSet = BTreeSet<PathBuf>;

/// Paths gained and lost between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSetDelta {
    pub added: PathSet,
    pub removed: PathSet,
}

impl FileSetDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Apply the delta to `baseline` in place.
    pub fn apply_to(&self, baseline: &mut PathSet) {
        for path in &self.removed {
            baseline.remove(path);
        }
        baseline.extend(self.added.iter().cloned());
    }

    /// Keep only the paths matching `keep`.
    pub fn filtered(&self, keep: impl Fn(&Path) -> bool) -> FileSetDelta {
        FileSetDelta {
            added: self.added.iter().filter(|p| keep(p)).cloned().collect(),
            removed: self.removed.iter().filter(|p| keep(p)).cloned().collect(),
        }
    }
}

/// Diff `old` against `new`.
///
/// `added` is `new - old`, `removed` is `old - new`; the two never overlap.
pub fn diff(old: &PathSet, new: &PathSet) -> FileSetDelta {
    FileSetDelta {
        added: new.difference(old).cloned().collect(),
        removed: old.difference(new).cloned().collect(),
    }
}

/// Diff a baseline against a fresh enumeration of one changed folder.
///
/// Removals are only reported for paths under `folder`. The enumeration only
/// covers that folder, so anything else missing from it is not actually gone.
pub fn diff_in_folder(baseline: &PathSet, folder: &Path, enumeration: &PathSet) -> FileSetDelta {
    let mut delta = diff(baseline, enumeration);
    delta.removed.retain(|path| path.starts_with(folder));
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> PathSet {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_diff_disjoint_sets() {
        let old = set(&["/a/1", "/a/2"]);
        let new = set(&["/a/3"]);

        let delta = diff(&old, &new);
        assert_eq!(delta.added, set(&["/a/3"]));
        assert_eq!(delta.removed, old);
        assert!(delta.added.is_disjoint(&delta.removed));
    }

    #[test]
    fn test_diff_equal_sets_is_empty() {
        let old = set(&["/a/1", "/a/2"]);
        assert!(diff(&old, &old.clone()).is_empty());
    }

    #[test]
    fn test_removal_outside_changed_folder_is_dropped() {
        let baseline = set(&["/w/a/one.qml", "/w/b/two.qml"]);
        let enumeration = set(&["/w/a/new.qml"]);

        let delta = diff_in_folder(&baseline, Path::new("/w/a"), &enumeration);
        assert_eq!(delta.added, set(&["/w/a/new.qml"]));
        assert_eq!(delta.removed, set(&["/w/a/one.qml"]));
    }

    #[test]
    fn test_apply_delta() {
        let mut baseline = set(&["/a/1", "/a/2"]);
        let delta = FileSetDelta {
            added: set(&["/a/3"]),
            removed: set(&["/a/1"]),
        };
        delta.apply_to(&mut baseline);
        assert_eq!(baseline, set(&["/a/2", "/a/3"]));
    }
}

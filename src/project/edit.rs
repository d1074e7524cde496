//! Adding and removing entries in build files.
//!
//! Every edit follows the same path: offer to save open editors, make the
//! file writable, parse it to be sure it is a build file, rewrite the
//! lines in place, write atomically, then schedule a re-evaluation.
//! Paths that could not be processed are returned rather than failing the
//! batch.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::engine::Project;
use super::error::{EditError, ProjectError, ProjectResult};
use crate::evaluation::ProFile;
use crate::paths::{base_name, clean_path, relative_to, to_qmake_string};
use crate::tree::NodeKind;
use crate::types::{FileType, MimeKind, NodeId, ProjectType, VARIABLES_FOR_REMOVING};
use crate::writer::{ensure_writable, prowriter, write_atomic};

/// What a user may do with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProjectAction {
    AddNewFile,
    AddExistingFile,
    RemoveFile,
    /// Delete from disk; the file is only there through a deployed folder.
    EraseFile,
    Rename,
    AddSubProject,
    RemoveSubProject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Add,
    Remove,
}

/// `path/name/name.pro` becomes `path/name`, the form `SUBDIRS` prefers.
pub fn simplify_pro_file_path(pro_file: &Path) -> PathBuf {
    let stem = base_name(pro_file);
    match pro_file.parent() {
        Some(parent) if parent.file_name().is_some_and(|n| *n.to_string_lossy() == *stem) => {
            parent.to_path_buf()
        }
        _ => pro_file.to_path_buf(),
    }
}

/// Only `.pro` and `.pri` files can become sub-projects.
pub fn can_add_sub_project(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pro" | "pri")
    )
}

fn group_by_kind(files: &[PathBuf]) -> BTreeMap<MimeKind, Vec<PathBuf>> {
    let mut groups: BTreeMap<MimeKind, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        groups
            .entry(MimeKind::from_path(file))
            .or_default()
            .push(clean_path(file));
    }
    groups
}

impl Project {
    fn unit_file(&self, unit: NodeId) -> ProjectResult<(PathBuf, PathBuf)> {
        let found = self.units.get(&unit).ok_or(ProjectError::UnknownUnit(unit))?;
        let owner = self.owning_pro(unit).ok_or(ProjectError::UnknownUnit(unit))?;
        let pro_dir = self
            .units
            .get(&owner)
            .map(|u| u.pri().directory().to_path_buf())
            .unwrap_or_default();
        Ok((found.file().to_path_buf(), pro_dir))
    }

    /// Paths of every file shown below `unit`, nested units included.
    fn known_files(&self, unit: NodeId) -> BTreeSet<PathBuf> {
        self.tree
            .descendants(unit)
            .into_iter()
            .filter_map(|id| self.tree.get(id))
            .map(|node| node.path.clone())
            .collect()
    }

    /// Read, rewrite and save the build file behind `unit`.
    fn rewrite<R>(
        &mut self,
        unit: NodeId,
        edit: impl FnOnce(&mut Vec<String>, &Path) -> R,
    ) -> ProjectResult<R> {
        let (file, pro_dir) = self.unit_file(unit)?;

        if self.documents.is_modified(&file) && !self.documents.save_modified(&file) {
            return Err(EditError::SaveCancelled(file).into());
        }
        ensure_writable(&file, self.vcs.as_ref())?;

        let text = std::fs::read_to_string(&file).map_err(|source| EditError::ReadFailed {
            path: file.clone(),
            source,
        })?;
        ProFile::from_source(&file, &text).map_err(|e| EditError::ParseFailed {
            path: file.clone(),
            message: e.to_string(),
        })?;

        let mut lines = prowriter::split_lines(&text);
        let result = edit(&mut lines, &pro_dir);

        self.documents.expect_change(&file);
        let written = write_atomic(&file, &prowriter::join_lines(&lines));
        if written.is_ok() {
            self.schedule_update(unit)?;
        }
        self.documents.unexpect_change(&file);
        written?;

        if let Err(e) = self.documents.reload(&file) {
            tracing::warn!(target: "writer", "reloading {} failed: {e}", file.display());
        }
        crate::debug_event!("writer", "saved", "{}", file.display());
        Ok(result)
    }

    fn change_files(
        &mut self,
        unit: NodeId,
        kind: MimeKind,
        files: &[PathBuf],
        change: Change,
    ) -> ProjectResult<Vec<PathBuf>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        self.rewrite(unit, |lines, pro_dir| match change {
            Change::Add => {
                let values: Vec<String> = files
                    .iter()
                    .map(|file| {
                        relative_to(file, pro_dir)
                            .map(|rel| to_qmake_string(&rel))
                            .unwrap_or_else(|| to_qmake_string(file))
                    })
                    .collect();
                prowriter::add_values(lines, kind.variable_for_adding(), &values);
                Vec::new()
            }
            Change::Remove => {
                prowriter::remove_values(lines, pro_dir, files, &VARIABLES_FOR_REMOVING)
            }
        })
    }

    /// Add `files` to the build file of `unit`, one variable per file kind.
    /// Resources referenced by added forms are added as well.
    ///
    /// Returns the files that were not added, including those the unit
    /// already shows.
    pub fn add_files(&mut self, unit: NodeId, files: &[PathBuf]) -> ProjectResult<Vec<PathBuf>> {
        let known = self.known_files(unit);
        let mut not_added = Vec::new();

        for (kind, group) in group_by_kind(files) {
            let mut resources = Vec::new();
            if kind == MimeKind::Form {
                for form in &group {
                    for resource in self.forms.form_resources(form) {
                        if !resources.contains(&resource) && !known.contains(&resource) {
                            resources.push(resource);
                        }
                    }
                }
            }

            let (present, mut unique): (Vec<PathBuf>, Vec<PathBuf>) =
                group.into_iter().partition(|file| known.contains(file));
            not_added.extend(present);
            unique.sort();
            not_added.extend(self.change_files(unit, kind, &unique, Change::Add)?);
            not_added.extend(self.change_files(unit, MimeKind::Resource, &resources, Change::Add)?);
        }
        Ok(not_added)
    }

    /// Remove `files` from the build file of `unit`. Returns the files no
    /// entry matched.
    pub fn remove_files(&mut self, unit: NodeId, files: &[PathBuf]) -> ProjectResult<Vec<PathBuf>> {
        let mut not_removed = Vec::new();
        for (kind, group) in group_by_kind(files) {
            not_removed.extend(self.change_files(unit, kind, &group, Change::Remove)?);
        }
        Ok(not_removed)
    }

    /// Like [`Project::remove_files`] for files about to be deleted from
    /// disk; unmatched entries are not an error.
    pub fn delete_files(&mut self, unit: NodeId, files: &[PathBuf]) -> ProjectResult<()> {
        let not_removed = self.remove_files(unit, files)?;
        if !not_removed.is_empty() {
            crate::debug_event!("writer", "not listed", "{} deleted files", not_removed.len());
        }
        Ok(())
    }

    /// Replace `old` with `new` in the build file of `unit`.
    ///
    /// Returns `false` when either step failed, unless the file lives in a
    /// folder the unit deploys, where listing it is optional anyway.
    pub fn rename_file(&mut self, unit: NodeId, old: &Path, new: &Path) -> ProjectResult<bool> {
        if new.as_os_str().is_empty() {
            return Err(EditError::InvalidPath(new.to_path_buf()).into());
        }
        let optional = old
            .parent()
            .zip(self.units.get(&unit))
            .is_some_and(|(folder, u)| u.pri().deploys_folder(folder));
        let kind = MimeKind::from_path(new);

        let not_removed = self.change_files(unit, kind, &[clean_path(old)], Change::Remove)?;
        if !not_removed.is_empty() && !optional {
            return Ok(false);
        }
        let not_added = self.change_files(unit, kind, &[clean_path(new)], Change::Add)?;
        Ok(not_added.is_empty() || optional)
    }

    /// Add `.pro`/`.pri` files to `SUBDIRS`. Returns those not added.
    pub fn add_sub_projects(&mut self, unit: NodeId, pro_files: &[PathBuf]) -> ProjectResult<Vec<PathBuf>> {
        let known = self.known_files(unit);
        let (present, unique): (Vec<PathBuf>, Vec<PathBuf>) = pro_files
            .iter()
            .map(|p| clean_path(p))
            .partition(|p| known.contains(p));
        let simplified: Vec<PathBuf> = unique.iter().map(|p| simplify_pro_file_path(p)).collect();

        let mut not_added = present;
        not_added.extend(self.change_files(unit, MimeKind::ProFile, &simplified, Change::Add)?);
        Ok(not_added)
    }

    /// Remove sub-projects, whether listed as `dir/dir.pro` or as `dir`.
    /// Returns those found in neither form.
    pub fn remove_sub_projects(&mut self, unit: NodeId, pro_files: &[PathBuf]) -> ProjectResult<Vec<PathBuf>> {
        let files: Vec<PathBuf> = pro_files.iter().map(|p| clean_path(p)).collect();
        let first = self.change_files(unit, MimeKind::ProFile, &files, Change::Remove)?;
        if first.is_empty() {
            return Ok(first);
        }
        let simplified: Vec<PathBuf> = first.iter().map(|p| simplify_pro_file_path(p)).collect();
        let second = self.change_files(unit, MimeKind::ProFile, &simplified, Change::Remove)?;
        Ok(first
            .into_iter()
            .zip(simplified)
            .filter(|(_, s)| second.contains(s))
            .map(|(original, _)| original)
            .collect())
    }

    /// Replace the first assignment of `var` with `var = value`.
    pub fn set_pro_variable(&mut self, unit: NodeId, var: &str, value: &str) -> ProjectResult<()> {
        self.rewrite(unit, |lines, _| {
            prowriter::set_values(lines, var, &[value.to_string()]);
        })
    }

    /// Actions offered for `node`, decided by the project type of the unit
    /// it belongs to.
    pub fn supported_actions(&self, node: NodeId) -> BTreeSet<ProjectAction> {
        let mut actions = BTreeSet::new();
        let Some(target) = self.tree.get(node) else {
            return actions;
        };
        let unit = std::iter::once(node)
            .chain(self.tree.ancestors(node))
            .find(|id| self.units.contains_key(id));
        let Some(unit) = unit else {
            return actions;
        };
        let pri = self.units[&unit].pri();
        let project_type = self
            .owning_pro(unit)
            .and_then(|owner| self.pro_unit(owner))
            .map(|pro| pro.project_type())
            .unwrap_or(ProjectType::Invalid);

        match project_type {
            ProjectType::Application | ProjectType::Library | ProjectType::Aux => {
                actions.insert(ProjectAction::AddNewFile);
                if pri.recursive_files().contains(&target.path) {
                    actions.insert(ProjectAction::EraseFile);
                } else {
                    actions.insert(ProjectAction::RemoveFile);
                }

                let mut add_existing = !pri.deploys_folder(&target.path);
                if matches!(target.kind, NodeKind::VirtualFolder { .. }) {
                    let folders: Vec<PathBuf> = self
                        .tree
                        .folder_children(node)
                        .map(|(_, n)| n.path.clone())
                        .collect();
                    if let Some(common) = common_path(&folders) {
                        add_existing &= !pri.deploys_folder(&common);
                    }
                }
                if add_existing {
                    actions.insert(ProjectAction::AddExistingFile);
                }
            }
            ProjectType::SubDirs => {
                actions.insert(ProjectAction::AddSubProject);
                actions.insert(ProjectAction::RemoveSubProject);
            }
            ProjectType::Script | ProjectType::Invalid => {}
        }

        if target
            .file_type()
            .is_some_and(|file_type| file_type != FileType::Project)
        {
            actions.insert(ProjectAction::Rename);
        }
        actions
    }

    /// The unit an edit of `file` should go through: the one showing it,
    /// else the root.
    pub fn unit_for_edit(&self, file: &Path) -> NodeId {
        let file = clean_path(file);
        let mut best: Option<(usize, NodeId)> = None;
        for &id in self.units.keys() {
            let shows = self
                .tree
                .files_in_unit(id)
                .into_iter()
                .any(|f| self.tree.path(f) == Some(file.as_path()));
            if shows {
                let depth = self.tree.ancestors(id).count();
                if best.is_none_or(|(d, b)| depth > d || (depth == d && id < b)) {
                    best = Some((depth, id));
                }
            }
        }
        best.map(|(_, id)| id).unwrap_or(self.root)
    }
}

fn common_path(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut iter = paths.iter();
    let mut common = iter.next()?.clone();
    for path in iter {
        while !path.starts_with(&common) {
            if !common.pop() {
                return None;
            }
        }
    }
    Some(common)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplify_pro_file_path() {
        assert_eq!(
            simplify_pro_file_path(Path::new("/p/lib/lib.pro")),
            PathBuf::from("/p/lib")
        );
        assert_eq!(
            simplify_pro_file_path(Path::new("/p/lib/other.pro")),
            PathBuf::from("/p/lib/other.pro")
        );
    }

    #[test]
    fn test_can_add_sub_project() {
        assert!(can_add_sub_project(Path::new("a/b.pro")));
        assert!(can_add_sub_project(Path::new("a/b.pri")));
        assert!(!can_add_sub_project(Path::new("a/b.cpp")));
    }

    #[test]
    fn test_common_path() {
        let paths = [PathBuf::from("/p/qml/a"), PathBuf::from("/p/qml/b/c")];
        assert_eq!(common_path(&paths), Some(PathBuf::from("/p/qml")));
        assert_eq!(common_path(&[]), None);
    }
}

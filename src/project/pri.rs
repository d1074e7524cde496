//! File classification and tree sync for one `.pro`/`.pri` file.
//!
//! A unit's files come from two places: the file variables its own
//! assignments contribute (`SOURCES`, `HEADERS`, ...) and whatever lies
//! below the folders it deploys through `DEPLOYMENT`/`INSTALLS`. The
//! latter are enumerated from disk and kept as a baseline so later folder
//! changes can be applied without evaluating anything.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::variables::{base_vpaths, full_vpaths};
use crate::evaluation::EvaluationReader;
use crate::fileset::{PathSet, diff_in_folder};
use crate::paths::{absolute_from, base_name};
use crate::tree::{HierarchyNode, NodeTree, ReconcileStats, reconcile};
use crate::types::{FILE_TYPE_TABLE, FileType, NodeId, is_qml_path};
use crate::watcher::{FolderWatchCoordinator, recursive_enumerate};

/// Evaluation results as seen by one file.
///
/// `exact`/`cumulative` are `None` when that pass did not read this file.
#[derive(Clone, Copy)]
pub struct PriInput<'a> {
    pub exact: Option<&'a dyn EvaluationReader>,
    pub cumulative: Option<&'a dyn EvaluationReader>,
    /// Directory of the owning `.pro` file; relative values resolve here.
    pub pro_dir: &'a Path,
    pub build_dir: &'a Path,
    /// `.sources` or `.files`, depending on the Qt version.
    pub deployment_suffix: &'a str,
}

#[derive(Debug, Clone)]
pub struct PriUnit {
    node: NodeId,
    owner: NodeId,
    file: PathBuf,
    directory: PathBuf,
    included_in_exact_parse: bool,
    files: BTreeMap<FileType, PathSet>,
    recursive_files: PathSet,
    watched_folders: BTreeSet<PathBuf>,
    project_file_node: Option<NodeId>,
}

impl PriUnit {
    /// `owner` is the `.pro` unit whose evaluation reads this file; a
    /// `.pro` unit owns itself.
    pub fn new(node: NodeId, owner: NodeId, file: PathBuf) -> Self {
        let directory = file.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            node,
            owner,
            file,
            directory,
            included_in_exact_parse: true,
            files: BTreeMap::new(),
            recursive_files: PathSet::new(),
            watched_folders: BTreeSet::new(),
            project_file_node: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn display_name(&self) -> String {
        base_name(&self.file)
    }

    pub fn included_in_exact_parse(&self) -> bool {
        self.included_in_exact_parse
    }

    pub fn set_included_in_exact_parse(&mut self, included: bool) {
        self.included_in_exact_parse = included;
    }

    /// Files of one type kept for incremental folder updates.
    pub fn files(&self, file_type: FileType) -> Option<&PathSet> {
        self.files.get(&file_type)
    }

    pub fn recursive_files(&self) -> &PathSet {
        &self.recursive_files
    }

    pub fn watched_folders(&self) -> &BTreeSet<PathBuf> {
        &self.watched_folders
    }

    /// Whether `folder` lies in (or is) a folder this unit deploys.
    pub fn deploys_folder(&self, folder: &Path) -> bool {
        self.watched_folders.iter().any(|watched| folder.starts_with(watched))
    }

    fn ensure_project_file_node(&mut self, tree: &mut NodeTree) {
        if self.project_file_node.is_some_and(|id| tree.contains(id)) {
            return;
        }
        let id = tree.create_file(self.file.clone(), FileType::Project, false);
        tree.attach(self.node, &[id]);
        self.project_file_node = Some(id);
    }

    /// Variables naming extra file lists, e.g. `qml.files` for
    /// `DEPLOYMENT += qml`.
    fn dynamic_variables(input: &PriInput<'_>) -> Vec<String> {
        let mut names = Vec::new();
        for reader in [input.exact, input.cumulative].into_iter().flatten() {
            for item in reader.values("DEPLOYMENT") {
                names.push(format!("{item}{}", input.deployment_suffix));
            }
        }
        for reader in [input.exact, input.cumulative].into_iter().flatten() {
            for item in reader.values("INSTALLS") {
                names.push(format!("{item}.files"));
            }
        }
        super::variables::dedup_in_order(&mut names);
        names
    }

    /// Re-read this file's contribution and bring the tree in line.
    pub fn update(
        &mut self,
        tree: &mut NodeTree,
        watch: &mut FolderWatchCoordinator,
        input: PriInput<'_>,
    ) -> ReconcileStats {
        self.ensure_project_file_node(tree);

        // Deployed folders come from this file's own exact assignments only.
        let mut folders = BTreeSet::new();
        let mut baseline = PathSet::new();
        if let Some(exact) = input.exact {
            for variable in Self::dynamic_variables(&input) {
                for value in exact.values_in(&variable, &self.file) {
                    let path = absolute_from(input.pro_dir, Path::new(&value));
                    if path.is_dir() {
                        folders.insert(path);
                    } else if path.exists() {
                        baseline.insert(path);
                    }
                }
            }
        }

        let change = watch.set_unit_folders(self.node, &self.watched_folders, &folders);
        if !change.is_empty() {
            crate::debug_event!(
                "project",
                "watch",
                "{}: +{} -{} folders",
                self.file.display(),
                change.to_watch.len(),
                change.to_unwatch.len()
            );
        }
        self.watched_folders = folders;
        for folder in &self.watched_folders {
            baseline.extend(recursive_enumerate(folder));
        }

        let mut found: BTreeMap<FileType, PathSet> = BTreeMap::new();
        for data in FILE_TYPE_TABLE.iter() {
            let paths = self.variable_files(&input, data.file_type);
            for path in &paths {
                baseline.remove(path);
            }
            found.insert(data.file_type, paths);
        }
        for (file_type, paths) in found.iter_mut() {
            paths.retain(|p| keeps_variable_file(*file_type, p));
            paths.extend(baseline.iter().filter(|p| takes_enumerated_file(*file_type, p)).cloned());
        }
        self.recursive_files = baseline;

        let desired = HierarchyNode::from_classified(&self.directory, &found);
        if self.watched_folders.is_empty() {
            self.files.clear();
        } else {
            self.files = found;
        }

        let stats = reconcile(tree, &desired, self.node);
        crate::debug_event!("project", "synced", "{} {:?}", self.file.display(), stats);
        stats
    }

    /// Every existing file named by the variables of `file_type`.
    fn variable_files(&self, input: &PriInput<'_>, file_type: FileType) -> PathSet {
        let mut paths = PathSet::new();
        for reader in [input.exact, input.cumulative].into_iter().flatten() {
            let base = base_vpaths(reader, input.pro_dir, input.build_dir);
            for variable in file_type.variables() {
                let search = full_vpaths(&base, reader, variable, input.pro_dir);
                paths.extend(
                    reader
                        .absolute_file_values(variable, input.pro_dir, &search, Some(&self.file))
                        .into_iter()
                        .filter(|p| p.is_file()),
                );
            }
        }
        paths
    }

    /// Apply a fresh enumeration of `changed`, a folder at or below one
    /// this unit deploys. Returns `false` when nothing changed.
    pub fn folder_changed(&mut self, tree: &mut NodeTree, changed: &Path, enumeration: &PathSet) -> bool {
        let mut delta = diff_in_folder(&self.recursive_files, changed, enumeration);
        // Files already named by a variable stay where they are.
        delta
            .added
            .retain(|path| !self.files.values().any(|set| set.contains(path)));
        if delta.is_empty() {
            return false;
        }
        delta.apply_to(&mut self.recursive_files);

        for data in FILE_TYPE_TABLE.iter() {
            let typed = delta.filtered(|p| takes_enumerated_file(data.file_type, p));
            if typed.is_empty() {
                continue;
            }
            typed.apply_to(self.files.entry(data.file_type).or_default());
        }

        let desired = HierarchyNode::from_classified(&self.directory, &self.files);
        let stats = reconcile(tree, &desired, self.node);
        crate::debug_event!(
            "project",
            "folder changed",
            "{}: +{} -{} ({:?})",
            changed.display(),
            delta.added.len(),
            delta.removed.len(),
            stats
        );
        true
    }

    /// Forget everything learned from the last update, watches included.
    /// The unit's nodes are the caller's to remove.
    pub fn reset(&mut self, watch: &mut FolderWatchCoordinator) {
        watch.remove_unit(self.node);
        self.watched_folders.clear();
        self.files.clear();
        self.recursive_files.clear();
        self.project_file_node = None;
    }
}

/// QML files listed in `OTHER_FILES` go to the QML folder, the rest to
/// "Other files".
fn keeps_variable_file(file_type: FileType, path: &Path) -> bool {
    match file_type {
        FileType::Qml => is_qml_path(path),
        FileType::Unknown => !is_qml_path(path),
        _ => true,
    }
}

/// Only QML and "Other files" pick up enumerated deployment content.
fn takes_enumerated_file(file_type: FileType, path: &Path) -> bool {
    match file_type {
        FileType::Qml => is_qml_path(path),
        FileType::Unknown => !is_qml_path(path),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{LoadMode, ProFile, QmakeReader, ReaderContext, ReaderMode};
    use crate::tree::NodeKind;
    use std::fs;
    use tempfile::TempDir;

    fn reader(mode: ReaderMode, pro: &Path) -> QmakeReader {
        let mut reader = QmakeReader::new(
            mode,
            ReaderContext {
                platform_scopes: vec!["unix".into()],
                config: Vec::new(),
                build_dir: pro.parent().unwrap().to_path_buf(),
            },
        );
        let file = ProFile::parse(pro).unwrap();
        reader.accept(&file, LoadMode::All);
        reader
    }

    fn setup(tree: &mut NodeTree, pro: &Path) -> PriUnit {
        let node = tree.create(NodeKind::Project, pro.to_path_buf(), base_name(pro));
        PriUnit::new(node, node, pro.to_path_buf())
    }

    fn file_paths(tree: &NodeTree, unit: NodeId) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = tree
            .files_in_unit(unit)
            .into_iter()
            .filter_map(|id| tree.path(id).map(Path::to_path_buf))
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_update_classifies_and_deploys() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("qml/views")).unwrap();
        fs::write(root.join("main.cpp"), "").unwrap();
        fs::write(root.join("main.h"), "").unwrap();
        fs::write(root.join("qml/main.qml"), "").unwrap();
        fs::write(root.join("qml/views/List.qml"), "").unwrap();
        fs::write(root.join("qml/logo.png"), "").unwrap();
        fs::write(root.join("qml/views/List.qml.autosave"), "").unwrap();
        let pro = root.join("app.pro");
        fs::write(
            &pro,
            "SOURCES += main.cpp gone.cpp\nHEADERS += main.h\nOTHER_FILES += qml/main.qml\n\
             folder.files = qml\nDEPLOYMENT += folder\n",
        )
        .unwrap();

        let exact = reader(ReaderMode::Exact, &pro);
        let cumulative = reader(ReaderMode::Cumulative, &pro);
        let mut tree = NodeTree::new();
        let mut watch = FolderWatchCoordinator::detached();
        let mut unit = setup(&mut tree, &pro);

        let input = PriInput {
            exact: Some(&exact),
            cumulative: Some(&cumulative),
            pro_dir: root,
            build_dir: root,
            deployment_suffix: ".files",
        };
        unit.update(&mut tree, &mut watch, input);

        assert!(unit.deploys_folder(&root.join("qml/views")));
        assert!(!unit.deploys_folder(root));
        let qml = unit.files(FileType::Qml).unwrap();
        assert!(qml.contains(&root.join("qml/main.qml")));
        assert!(qml.contains(&root.join("qml/views/List.qml")));
        assert!(unit.files(FileType::Unknown).unwrap().contains(&root.join("qml/logo.png")));
        // Named by OTHER_FILES, so not part of the enumerated baseline.
        assert!(!unit.recursive_files().contains(&root.join("qml/main.qml")));

        let files = file_paths(&tree, unit.node());
        assert!(files.contains(&root.join("main.cpp")));
        assert!(!files.contains(&root.join("gone.cpp")));
        assert!(!files.iter().any(|p| p.to_string_lossy().ends_with(".autosave")));
        // The build file itself is listed too.
        assert!(files.contains(&pro));

        let second = unit.update(&mut tree, &mut watch, input);
        assert!(second.is_noop());
    }

    #[test]
    fn test_no_deployment_clears_stored_sets() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.cpp"), "").unwrap();
        let pro = dir.path().join("app.pro");
        fs::write(&pro, "SOURCES = main.cpp\n").unwrap();

        let exact = reader(ReaderMode::Exact, &pro);
        let mut tree = NodeTree::new();
        let mut watch = FolderWatchCoordinator::detached();
        let mut unit = setup(&mut tree, &pro);
        unit.update(
            &mut tree,
            &mut watch,
            PriInput {
                exact: Some(&exact),
                cumulative: None,
                pro_dir: dir.path(),
                build_dir: dir.path(),
                deployment_suffix: ".files",
            },
        );

        assert!(unit.files(FileType::Source).is_none());
        assert!(file_paths(&tree, unit.node()).contains(&dir.path().join("main.cpp")));
    }

    #[test]
    fn test_folder_changed_applies_delta() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("assets/icons")).unwrap();
        fs::write(root.join("assets/a.qml"), "").unwrap();
        fs::write(root.join("assets/icons/x.png"), "").unwrap();
        let pro = root.join("app.pro");
        fs::write(&pro, "res.files = assets\nINSTALLS += res\n").unwrap();

        let exact = reader(ReaderMode::Exact, &pro);
        let mut tree = NodeTree::new();
        let mut watch = FolderWatchCoordinator::detached();
        let mut unit = setup(&mut tree, &pro);
        unit.update(
            &mut tree,
            &mut watch,
            PriInput {
                exact: Some(&exact),
                cumulative: None,
                pro_dir: root,
                build_dir: root,
                deployment_suffix: ".files",
            },
        );

        // Unchanged disk: no-op.
        let icons = root.join("assets/icons");
        assert!(!unit.folder_changed(&mut tree, &icons, &recursive_enumerate(&icons)));

        fs::remove_file(root.join("assets/icons/x.png")).unwrap();
        fs::write(root.join("assets/icons/y.png"), "").unwrap();
        fs::write(root.join("assets/b.qml"), "").unwrap();
        assert!(unit.folder_changed(&mut tree, &icons, &recursive_enumerate(&icons)));

        let files = file_paths(&tree, unit.node());
        assert!(files.contains(&root.join("assets/icons/y.png")));
        assert!(!files.contains(&root.join("assets/icons/x.png")));
        // Outside the changed folder, so not picked up yet.
        assert!(!files.contains(&root.join("assets/b.qml")));
        assert!(files.contains(&root.join("assets/a.qml")));
    }
}

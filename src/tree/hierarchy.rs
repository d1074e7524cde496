//! Desired folder layout built from flat sets of file paths.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::fileset::PathSet;
use crate::types::{FILE_TYPE_TABLE, FileType};

/// One folder of the desired tree.
///
/// `type_name` is set only on per-type virtual folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub virtual_folders: Vec<HierarchyNode>,
    /// Keyed by the folder's absolute path.
    pub subnodes: BTreeMap<PathBuf, HierarchyNode>,
    pub files: Vec<PathBuf>,
    pub file_type: FileType,
    pub priority: i32,
    pub display_name: String,
    pub type_name: Option<String>,
    pub full_path: PathBuf,
}

impl HierarchyNode {
    /// The synthetic root that holds one virtual folder per non-empty type.
    pub fn root(full_path: &Path) -> Self {
        Self::folder(full_path.to_path_buf(), String::new(), FileType::Unknown)
    }

    fn folder(full_path: PathBuf, display_name: String, file_type: FileType) -> Self {
        Self {
            virtual_folders: Vec::new(),
            subnodes: BTreeMap::new(),
            files: Vec::new(),
            file_type,
            priority: 0,
            display_name,
            type_name: None,
            full_path,
        }
    }

    /// Virtual folder for `file_type` rooted at `project_dir`, filled with `files`.
    pub fn virtual_folder(project_dir: &Path, file_type: FileType, files: &PathSet) -> Self {
        let type_name = file_type.type_name().to_string();
        let mut node = Self::folder(project_dir.to_path_buf(), type_name.clone(), file_type);
        node.priority = file_type.priority();
        node.type_name = Some(type_name);
        node.create(project_dir, files);
        node
    }

    /// Root populated with a virtual folder for every type that has files.
    pub fn from_classified(project_dir: &Path, files: &BTreeMap<FileType, PathSet>) -> Self {
        let mut root = Self::root(project_dir);
        for data in FILE_TYPE_TABLE.iter() {
            if let Some(paths) = files.get(&data.file_type).filter(|p| !p.is_empty()) {
                root.virtual_folders
                    .push(Self::virtual_folder(project_dir, data.file_type, paths));
            }
        }
        root
    }

    /// Insert `files` below this node, then compress.
    ///
    /// Paths under `project_dir` are laid out relative to it. Anything else
    /// hangs off its filesystem root, so `/usr/include/x.h` appears under a
    /// `/usr/include` folder.
    pub fn create(&mut self, project_dir: &Path, files: &PathSet) {
        for file in files {
            let (relative, mut cursor_path) = match file.strip_prefix(project_dir) {
                Ok(rest) if !rest.as_os_str().is_empty() => (rest, project_dir.to_path_buf()),
                _ => (file.as_path(), PathBuf::new()),
            };

            let parts: Vec<Component<'_>> = relative.components().collect();
            let Some((_, dirs)) = parts.split_last() else {
                continue;
            };

            let mut current = &mut *self;
            let mut pending_root = String::new();
            for component in dirs {
                cursor_path.push(component.as_os_str());
                let label = match component {
                    Component::RootDir | Component::Prefix(_) => {
                        // Folded into the first real directory's label.
                        pending_root.push_str(&component.as_os_str().to_string_lossy());
                        continue;
                    }
                    other => {
                        let mut label = std::mem::take(&mut pending_root);
                        label.push_str(&other.as_os_str().to_string_lossy());
                        label
                    }
                };
                let file_type = current.file_type;
                current = current
                    .subnodes
                    .entry(cursor_path.clone())
                    .or_insert_with(|| Self::folder(cursor_path.clone(), label, file_type));
            }
            current.files.push(file.clone());
        }
        self.compress();
    }

    /// Collapse folders that hold no files and exactly one subfolder.
    ///
    /// The surviving child keeps its key and takes `parent/child` as label.
    pub fn compress(&mut self) {
        let subnodes = std::mem::take(&mut self.subnodes);
        for (key, mut child) in subnodes {
            child.compress();
            if child.files.is_empty() && child.subnodes.len() == 1 {
                if let Some((only_key, mut only)) = child.subnodes.pop_first() {
                    only.display_name = format!("{}/{}", child.display_name, only.display_name);
                    self.subnodes.insert(only_key, only);
                    continue;
                }
            }
            self.subnodes.insert(key, child);
        }
    }

    /// Every file below this node.
    pub fn all_files(&self) -> Vec<&Path> {
        let mut out: Vec<&Path> = self.files.iter().map(PathBuf::as_path).collect();
        for node in self.virtual_folders.iter().chain(self.subnodes.values()) {
            out.extend(node.all_files());
        }
        out
    }

    /// Number of folders below this node, virtual ones included.
    pub fn folder_count(&self) -> usize {
        self.virtual_folders
            .iter()
            .chain(self.subnodes.values())
            .map(|node| 1 + node.folder_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> PathSet {
        paths.iter().map(PathBuf::from).collect()
    }

    fn build(files: &[&str]) -> HierarchyNode {
        HierarchyNode::virtual_folder(Path::new("/proj"), FileType::Source, &set(files))
    }

    #[test]
    fn test_empty_input_builds_empty_tree() {
        let node = build(&[]);
        assert!(node.files.is_empty());
        assert!(node.subnodes.is_empty());
    }

    #[test]
    fn test_single_child_chain_is_compressed() {
        let node = build(&["/proj/src/app/widgets/button.cpp"]);

        assert_eq!(node.subnodes.len(), 1);
        let (key, child) = node.subnodes.iter().next().unwrap();
        assert_eq!(key, Path::new("/proj/src/app/widgets"));
        assert_eq!(child.display_name, "src/app/widgets");
        assert_eq!(child.files, vec![PathBuf::from("/proj/src/app/widgets/button.cpp")]);
    }

    #[test]
    fn test_folder_with_two_children_survives() {
        let node = build(&["/proj/src/a/one.cpp", "/proj/src/b/two.cpp"]);

        let src = &node.subnodes[Path::new("/proj/src")];
        assert_eq!(src.display_name, "src");
        assert_eq!(src.subnodes.len(), 2);
    }

    #[test]
    fn test_folder_with_file_survives() {
        let node = build(&["/proj/src/main.cpp", "/proj/src/deep/x/util.cpp"]);

        let src = &node.subnodes[Path::new("/proj/src")];
        assert_eq!(src.files.len(), 1);
        assert_eq!(src.subnodes[Path::new("/proj/src/deep/x")].display_name, "deep/x");
    }

    #[test]
    fn test_outside_files_are_rooted_at_filesystem_root() {
        let node = build(&["/usr/include/qt/qobject.h", "/proj/main.cpp"]);

        assert_eq!(node.files, vec![PathBuf::from("/proj/main.cpp")]);
        let outside = &node.subnodes[Path::new("/usr/include/qt")];
        assert_eq!(outside.display_name, "/usr/include/qt");
    }

    #[test]
    fn test_every_file_is_one_leaf() {
        let files = set(&[
            "/proj/a.cpp",
            "/proj/src/b.cpp",
            "/proj/src/sub/c.cpp",
            "/other/d.cpp",
        ]);
        let node = HierarchyNode::virtual_folder(Path::new("/proj"), FileType::Source, &files);

        let mut leaves: Vec<PathBuf> = node.all_files().into_iter().map(Path::to_path_buf).collect();
        leaves.sort();
        assert_eq!(leaves, files.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_compress_is_idempotent() {
        let node = build(&["/proj/x/y/z/a.cpp", "/proj/x/w/b.cpp", "/proj/q/r/c.cpp"]);
        let mut again = node.clone();
        again.compress();
        assert_eq!(node, again);
    }
}

//! Apply a desired [`HierarchyNode`] to a live folder with minimal edits.
//!
//! Folders and files whose identity is unchanged keep their [`NodeId`];
//! only their children are adjusted.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use super::hierarchy::HierarchyNode;
use super::node::{NodeKind, NodeTree};
use crate::types::{FileType, NodeId};

/// Operation counts of one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub files_added: usize,
    pub files_removed: usize,
    pub folders_added: usize,
    pub folders_removed: usize,
}

impl ReconcileStats {
    pub fn is_noop(&self) -> bool {
        *self == ReconcileStats::default()
    }
}

/// Make the subtree below `folder` match `desired`.
///
/// Unit nodes and generated files below `folder` are left alone.
pub fn reconcile(tree: &mut NodeTree, desired: &HierarchyNode, folder: NodeId) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    update_sub_folders(tree, desired, folder, &mut stats);
    stats
}

fn update_sub_folders(tree: &mut NodeTree, desired: &HierarchyNode, folder: NodeId, stats: &mut ReconcileStats) {
    update_files(tree, folder, &desired.files, desired.file_type, stats);

    // Plain folders are keyed by path alone; virtual folders also by priority.
    let mut existing: Vec<(PathBuf, Option<i32>, NodeId)> = tree
        .folder_children(folder)
        .map(|(id, node)| {
            let priority = match node.kind {
                NodeKind::VirtualFolder { priority, .. } => Some(priority),
                _ => None,
            };
            (node.path.clone(), priority, id)
        })
        .collect();
    existing.sort();

    let wanted: Vec<&HierarchyNode> = desired
        .virtual_folders
        .iter()
        .chain(desired.subnodes.values())
        .collect();
    let mut order: Vec<usize> = (0..wanted.len()).collect();
    order.sort_by(|&a, &b| folder_key(wanted[a]).cmp(&folder_key(wanted[b])));

    let mut matched: Vec<Option<NodeId>> = vec![None; wanted.len()];
    let mut to_remove = Vec::new();
    let (mut e, mut w) = (0, 0);
    while e < existing.len() && w < order.len() {
        let (path, priority, id) = &existing[e];
        match (path.as_path(), *priority).cmp(&folder_key(wanted[order[w]])) {
            Ordering::Less => {
                to_remove.push(*id);
                e += 1;
            }
            Ordering::Greater => w += 1,
            Ordering::Equal => {
                matched[order[w]] = Some(*id);
                e += 1;
                w += 1;
            }
        }
    }
    to_remove.extend(existing[e..].iter().map(|(_, _, id)| *id));

    let mut to_add = Vec::new();
    let mut pairs = Vec::with_capacity(wanted.len());
    for (node, found) in wanted.into_iter().zip(matched) {
        match found {
            Some(id) => pairs.push((node, id, true)),
            None => {
                let id = create_folder_node(tree, node);
                to_add.push(id);
                pairs.push((node, id, false));
            }
        }
    }

    stats.folders_removed += to_remove.len();
    stats.folders_added += to_add.len();
    tree.remove(folder, &to_remove);
    tree.attach(folder, &to_add);

    for (wanted, id, kept) in pairs {
        if kept {
            tree.set_display_name(id, &wanted.display_name);
        }
        update_sub_folders(tree, wanted, id, stats);
    }
}

fn folder_key(node: &HierarchyNode) -> (&Path, Option<i32>) {
    (
        node.full_path.as_path(),
        node.type_name.is_some().then_some(node.priority),
    )
}

fn create_folder_node(tree: &mut NodeTree, wanted: &HierarchyNode) -> NodeId {
    let kind = match &wanted.type_name {
        Some(type_name) => NodeKind::VirtualFolder {
            priority: wanted.priority,
            type_name: type_name.clone(),
        },
        None => NodeKind::Folder,
    };
    tree.create(kind, wanted.full_path.clone(), wanted.display_name.clone())
}

/// Lock-step walk over the sorted existing and desired file paths.
fn update_files(
    tree: &mut NodeTree,
    folder: NodeId,
    files: &[PathBuf],
    file_type: FileType,
    stats: &mut ReconcileStats,
) {
    let mut existing: Vec<(PathBuf, NodeId)> = tree
        .file_children(folder)
        .filter(|(_, node)| {
            matches!(node.kind, NodeKind::File { file_type: t, generated: false } if t == file_type)
        })
        .map(|(id, node)| (node.path.clone(), id))
        .collect();
    existing.sort();

    let mut wanted: Vec<&PathBuf> = files.iter().collect();
    wanted.sort();
    wanted.dedup();

    let mut to_remove = Vec::new();
    let mut to_add_paths = Vec::new();
    let (mut e, mut w) = (0, 0);
    while e < existing.len() && w < wanted.len() {
        match existing[e].0.cmp(wanted[w]) {
            Ordering::Less => {
                to_remove.push(existing[e].1);
                e += 1;
            }
            Ordering::Greater => {
                to_add_paths.push(wanted[w].clone());
                w += 1;
            }
            Ordering::Equal => {
                e += 1;
                w += 1;
            }
        }
    }
    to_remove.extend(existing[e..].iter().map(|(_, id)| *id));
    to_add_paths.extend(wanted[w..].iter().map(|p| (*p).clone()));

    stats.files_removed += to_remove.len();
    stats.files_added += to_add_paths.len();
    tree.remove(folder, &to_remove);

    let to_add: Vec<NodeId> = to_add_paths
        .into_iter()
        .map(|path| tree.create_file(path, file_type, false))
        .collect();
    tree.attach(folder, &to_add);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::PathSet;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn classified(entries: &[(FileType, &[&str])]) -> BTreeMap<FileType, PathSet> {
        entries
            .iter()
            .map(|(t, paths)| (*t, paths.iter().map(PathBuf::from).collect()))
            .collect()
    }

    fn unit_tree() -> (NodeTree, NodeId) {
        let mut tree = NodeTree::new();
        let unit = tree.create(NodeKind::Project, PathBuf::from("/proj/app.pro"), "app");
        (tree, unit)
    }

    #[test]
    fn test_from_empty_adds_every_leaf_and_folder_once() {
        let (mut tree, unit) = unit_tree();
        let files = classified(&[
            (FileType::Source, &["/proj/main.cpp", "/proj/src/a.cpp", "/proj/src/b.cpp"]),
            (FileType::Header, &["/proj/src/a.h"]),
        ]);
        let desired = HierarchyNode::from_classified(Path::new("/proj"), &files);

        let stats = reconcile(&mut tree, &desired, unit);
        assert_eq!(stats.files_added, 4);
        assert_eq!(stats.folders_added, desired.folder_count());
        assert_eq!(stats.files_removed + stats.folders_removed, 0);
        assert_eq!(tree.files_in_unit(unit).len(), 4);
    }

    #[test]
    fn test_reconcile_equal_tree_is_noop() {
        let (mut tree, unit) = unit_tree();
        let files = classified(&[(FileType::Source, &["/proj/main.cpp", "/proj/src/deep/a.cpp"])]);
        let desired = HierarchyNode::from_classified(Path::new("/proj"), &files);
        reconcile(&mut tree, &desired, unit);

        let before = tree.descendants(unit);
        let stats = reconcile(&mut tree, &desired, unit);
        assert!(stats.is_noop());
        assert_eq!(tree.descendants(unit), before);
    }

    #[test]
    fn test_unchanged_nodes_keep_identity() {
        let (mut tree, unit) = unit_tree();
        let first = classified(&[(FileType::Source, &["/proj/a.cpp", "/proj/b.cpp"])]);
        reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &first), unit);
        let a_before = find_file(&tree, unit, "/proj/a.cpp");

        let second = classified(&[(FileType::Source, &["/proj/a.cpp", "/proj/c.cpp"])]);
        let stats = reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &second), unit);

        assert_eq!(stats.files_added, 1);
        assert_eq!(stats.files_removed, 1);
        assert_eq!(find_file(&tree, unit, "/proj/a.cpp"), a_before);
        assert!(find_file(&tree, unit, "/proj/b.cpp").is_none());
    }

    #[test]
    fn test_virtual_folders_disambiguated_by_priority() {
        let (mut tree, unit) = unit_tree();
        let files = classified(&[
            (FileType::Qml, &["/proj/main.qml"]),
            (FileType::Unknown, &["/proj/README"]),
        ]);
        reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &files), unit);
        assert_eq!(tree.folder_children(unit).count(), 2);

        let only_qml = classified(&[(FileType::Qml, &["/proj/main.qml"])]);
        let stats = reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &only_qml), unit);
        assert_eq!(stats.folders_removed, 1);
        assert_eq!(stats.folders_added, 0);
    }

    #[test]
    fn test_units_and_generated_files_are_untouched() {
        let (mut tree, unit) = unit_tree();
        let sub = tree.create(NodeKind::Project, PathBuf::from("/proj/lib/lib.pro"), "lib");
        let pro_file = tree.create_file(PathBuf::from("/proj/app.pro"), FileType::Project, false);
        tree.attach(unit, &[sub, pro_file]);

        let stats = reconcile(&mut tree, &HierarchyNode::root(Path::new("/proj")), unit);
        assert!(stats.is_noop());
        assert!(tree.contains(sub));
        assert!(tree.contains(pro_file));
    }

    #[test]
    fn test_many_sibling_folders_keep_identity() {
        let (mut tree, unit) = unit_tree();
        let paths: Vec<String> = (0..40).map(|i| format!("/proj/d{i:02}/x.cpp")).collect();
        let all: Vec<&str> = paths.iter().map(String::as_str).collect();
        let first = classified(&[(FileType::Source, all.as_slice())]);
        reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &first), unit);
        let before = folder_ids(&tree, unit);
        assert_eq!(before.len(), 40);

        let even: Vec<&str> = all.iter().copied().step_by(2).chain(["/proj/new/x.cpp"]).collect();
        let second = classified(&[(FileType::Source, even.as_slice())]);
        let stats = reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &second), unit);
        assert_eq!(stats.folders_removed, 20);
        assert_eq!(stats.folders_added, 1);

        let after = folder_ids(&tree, unit);
        for (path, id) in &after {
            if let Some(old) = before.get(path) {
                assert_eq!(old, id, "{} was recreated", path.display());
            }
        }
        assert_eq!(after.len(), 21);
    }

    #[test]
    fn test_same_path_virtual_folders_matched_by_priority() {
        let (mut tree, unit) = unit_tree();
        let files = classified(&[
            (FileType::Source, &["/proj/main.cpp"]),
            (FileType::Header, &["/proj/main.h"]),
            (FileType::Qml, &["/proj/main.qml"]),
        ]);
        reconcile(&mut tree, &HierarchyNode::from_classified(Path::new("/proj"), &files), unit);
        let virtual_ids: Vec<(i32, NodeId)> = virtual_folders(&tree, unit);
        assert_eq!(virtual_ids.len(), 3);

        let without_headers = classified(&[
            (FileType::Source, &["/proj/main.cpp"]),
            (FileType::Qml, &["/proj/main.qml"]),
        ]);
        let stats = reconcile(
            &mut tree,
            &HierarchyNode::from_classified(Path::new("/proj"), &without_headers),
            unit,
        );
        assert_eq!(stats.folders_removed, 1);
        assert_eq!(stats.folders_added, 0);
        let remaining = virtual_folders(&tree, unit);
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|entry| virtual_ids.contains(entry)));
    }

    fn folder_ids(tree: &NodeTree, unit: NodeId) -> BTreeMap<PathBuf, NodeId> {
        tree.descendants(unit)
            .into_iter()
            .filter(|id| matches!(tree.get(*id).map(|n| &n.kind), Some(NodeKind::Folder)))
            .filter_map(|id| Some((tree.path(id)?.to_path_buf(), id)))
            .collect()
    }

    fn virtual_folders(tree: &NodeTree, unit: NodeId) -> Vec<(i32, NodeId)> {
        tree.folder_children(unit)
            .filter_map(|(id, node)| match node.kind {
                NodeKind::VirtualFolder { priority, .. } => Some((priority, id)),
                _ => None,
            })
            .collect()
    }

    fn find_file(tree: &NodeTree, unit: NodeId, path: &str) -> Option<NodeId> {
        tree.files_in_unit(unit)
            .into_iter()
            .find(|id| tree.path(*id) == Some(Path::new(path)))
    }
}

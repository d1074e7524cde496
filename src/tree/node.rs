//! Arena of project tree nodes.
//!
//! Nodes are created detached, then attached to a parent in batches so
//! observers see one notification per batch. Ids are never reused, so a
//! stale [`NodeId`] simply stops resolving once its node is removed.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{FileType, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File { file_type: FileType, generated: bool },
    Folder,
    /// Per-type grouping with no filesystem counterpart.
    VirtualFolder { priority: i32, type_name: String },
    /// A `.pro` or `.pri` unit.
    Project,
}

impl NodeKind {
    pub fn is_folder_like(&self) -> bool {
        matches!(self, NodeKind::Folder | NodeKind::VirtualFolder { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub path: PathBuf,
    pub display_name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn file_type(&self) -> Option<FileType> {
        match self.kind {
            NodeKind::File { file_type, .. } => Some(file_type),
            _ => None,
        }
    }
}

/// Notified after nodes are attached and before they are detached.
pub trait TreeObserver: Send + Sync {
    fn nodes_added(&self, _tree: &NodeTree, _parent: NodeId, _nodes: &[NodeId]) {}
    fn nodes_about_to_be_removed(&self, _tree: &NodeTree, _parent: NodeId, _nodes: &[NodeId]) {}
    fn node_updated(&self, _tree: &NodeTree, _node: NodeId) {}
}

#[derive(Default)]
pub struct NodeTree {
    slots: Vec<Option<Node>>,
    observers: Vec<Arc<dyn TreeObserver>>,
}

impl std::fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTree")
            .field("live", &self.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    /// Number of live nodes, attached or not.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a detached node.
    pub fn create(&mut self, kind: NodeKind, path: PathBuf, display_name: impl Into<String>) -> NodeId {
        self.slots.push(Some(Node {
            kind,
            path,
            display_name: display_name.into(),
            parent: None,
            children: Vec::new(),
        }));
        // Slot count is the 1-based id of the slot just pushed.
        NodeId::new(self.slots.len() as u32).unwrap_or_else(|| unreachable!("slot count is non-zero"))
    }

    pub fn create_file(&mut self, path: PathBuf, file_type: FileType, generated: bool) -> NodeId {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        self.create(NodeKind::File { file_type, generated }, path, display_name)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn path(&self, id: NodeId) -> Option<&Path> {
        self.get(id).map(|n| n.path.as_path())
    }

    /// Attach detached nodes below `parent` as one batch.
    pub fn attach(&mut self, parent: NodeId, nodes: &[NodeId]) {
        if nodes.is_empty() || !self.contains(parent) {
            return;
        }
        for &id in nodes {
            if let Some(node) = self.get_mut(id) {
                node.parent = Some(parent);
            }
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.extend_from_slice(nodes);
        }
        for observer in &self.observers {
            observer.nodes_added(self, parent, nodes);
        }
    }

    /// Detach and drop `nodes` (all children of `parent`) with their subtrees.
    pub fn remove(&mut self, parent: NodeId, nodes: &[NodeId]) {
        if nodes.is_empty() {
            return;
        }
        for observer in &self.observers {
            observer.nodes_about_to_be_removed(self, parent, nodes);
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|child| !nodes.contains(child));
        }
        for &id in nodes {
            self.drop_subtree(id);
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.slots.get_mut(current.index()).and_then(Option::take) {
                stack.extend(node.children);
            }
        }
    }

    pub fn set_display_name(&mut self, id: NodeId, name: &str) {
        let changed = match self.get_mut(id) {
            Some(node) if node.display_name != name => {
                node.display_name = name.to_string();
                true
            }
            _ => false,
        };
        if changed {
            for observer in &self.observers {
                observer.node_updated(self, id);
            }
        }
    }

    /// File children of `folder`.
    pub fn file_children(&self, folder: NodeId) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.children_matching(folder, |kind| matches!(kind, NodeKind::File { .. }))
    }

    /// Folder and virtual folder children of `folder`. Units are excluded.
    pub fn folder_children(&self, folder: NodeId) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.children_matching(folder, NodeKind::is_folder_like)
    }

    /// Unit children of `folder`.
    pub fn project_children(&self, folder: NodeId) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.children_matching(folder, |kind| matches!(kind, NodeKind::Project))
    }

    fn children_matching(
        &self,
        folder: NodeId,
        pred: impl Fn(&NodeKind) -> bool + 'static,
    ) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.children(folder)
            .iter()
            .filter_map(move |&id| self.get(id).map(|node| (id, node)))
            .filter(move |(_, node)| pred(&node.kind))
    }

    /// Parent chain of `id`, nearest first, `id` excluded.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// Every node below `id`, depth first, `id` excluded.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Every file node in the subtree of `id`, stopping at nested units.
    pub fn files_in_unit(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for &child in self.children(current) {
                match self.get(child).map(|n| &n.kind) {
                    Some(NodeKind::File { .. }) => out.push(child),
                    Some(NodeKind::Folder | NodeKind::VirtualFolder { .. }) => stack.push(child),
                    _ => {}
                }
            }
        }
        out
    }

    /// Indented text rendering of the subtree at `id`.
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.render_into(id, 0, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        let marker = match &node.kind {
            NodeKind::Project => "[pro]",
            NodeKind::VirtualFolder { .. } => "[vf]",
            NodeKind::Folder => "[dir]",
            NodeKind::File { .. } => "",
        };
        let _ = writeln!(out, "{:indent$}{} {}", "", marker, node.display_name, indent = depth * 2);

        let mut children: Vec<NodeId> = node.children.clone();
        children.sort_by(|a, b| self.display_order(*a).cmp(&self.display_order(*b)));
        for child in children {
            self.render_into(child, depth + 1, out);
        }
    }

    fn display_order(&self, id: NodeId) -> (u8, i32, String) {
        match self.get(id) {
            Some(node) => match &node.kind {
                NodeKind::Project => (0, 0, node.display_name.clone()),
                NodeKind::VirtualFolder { priority, .. } => (1, -priority, node.display_name.clone()),
                NodeKind::Folder => (2, 0, node.display_name.clone()),
                NodeKind::File { .. } => (3, 0, node.display_name.clone()),
            },
            None => (4, 0, String::new()),
        }
    }
}

pub struct Ancestors<'a> {
    tree: &'a NodeTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

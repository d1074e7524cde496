//! Live project tree and the machinery that keeps it in sync.
//!
//! ```text
//! classified files ──> HierarchyNode (desired) ──reconcile──> NodeTree (live)
//! ```

mod hierarchy;
mod node;
mod reconcile;

pub use hierarchy::HierarchyNode;
pub use node::{Ancestors, Node, NodeKind, NodeTree, TreeObserver};
pub use reconcile::{ReconcileStats, reconcile};

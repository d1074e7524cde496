//! Incremental model of a qmake project tree.
//!
//! A [`project::Project`] evaluates `.pro`/`.pri` files on a worker pool,
//! mirrors the files they name into a [`tree::NodeTree`], keeps deployed
//! folders in sync through filesystem watches and rewrites build files
//! when files are added, removed or renamed.

pub mod cli;
pub mod config;
pub mod evaluation;
pub mod fileset;
pub mod logging;
pub mod paths;
pub mod plugins;
pub mod project;
pub mod tree;
pub mod types;
pub mod watcher;
pub mod writer;

pub use config::Settings;
pub use project::{Project, ProjectBuilder, ProjectError, ProjectListener, ProjectResult};
pub use tree::{NodeKind, NodeTree, TreeObserver};
pub use types::{FileType, NodeId, ProjectType};

//! Keep a project in sync with the filesystem until stopped.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;

use super::open_project;
use crate::config::Settings;
use crate::project::ProjectListener;
use crate::tree::{NodeTree, TreeObserver};
use crate::types::{NodeId, ProjectType};

/// Prints tree changes as they happen.
struct ChangePrinter;

impl TreeObserver for ChangePrinter {
    fn nodes_added(&self, tree: &NodeTree, _parent: NodeId, nodes: &[NodeId]) {
        for &node in nodes {
            if let Some(path) = tree.path(node) {
                println!("+ {}", path.display());
            }
        }
    }

    fn nodes_about_to_be_removed(&self, tree: &NodeTree, _parent: NodeId, nodes: &[NodeId]) {
        for &node in nodes {
            if let Some(path) = tree.path(node) {
                println!("- {}", path.display());
            }
        }
    }
}

impl ProjectListener for ChangePrinter {
    fn project_type_changed(&self, unit: NodeId, old: ProjectType, new: ProjectType) {
        println!("~ unit {unit}: {old} -> {new}");
    }

    fn pro_file_updated(&self, unit: NodeId, valid_parse: bool, parse_in_progress: bool) {
        if !parse_in_progress {
            let state = if valid_parse { "parsed" } else { "failed" };
            println!("~ unit {unit}: {state}");
        }
    }
}

pub fn run(pro_file: &Path, seconds: Option<u64>, settings: &Settings) -> anyhow::Result<()> {
    if !settings.watch.enabled {
        bail!("Watching is disabled in the settings (watch.enabled = false)");
    }
    let mut project = open_project(pro_file, settings, true)?;
    let printer = Arc::new(ChangePrinter);
    project.add_tree_observer(printer.clone());
    project.subscribe(printer);

    println!(
        "Watching {} folders of {}",
        project.watched_folders().len(),
        project.root_pro_file().display()
    );

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let tick = Duration::from_millis(settings.watch.debounce_ms.max(50));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        project.wait_watcher(tick)?;
        project.process_evaluations();
    }
    project.cancel_evaluations();
    Ok(())
}

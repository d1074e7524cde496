//! Shared helpers for project integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use qmaketree::{Project, ProjectBuilder, Settings};

/// Write `content` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Open and fully evaluate `pro_file` without live watches.
pub fn load(pro_file: &Path) -> Project {
    let mut settings = Settings::default();
    settings.evaluation.worker_threads = 2;
    let mut project = ProjectBuilder::new(pro_file)
        .settings(settings)
        .build()
        .unwrap();
    let root = project.root();
    project.update(root).unwrap();
    project.wait_for_evaluations();
    project
}

/// Paths of every node below the root, the root excluded.
pub fn node_paths(project: &Project) -> Vec<PathBuf> {
    let tree = project.tree();
    tree.descendants(project.root())
        .into_iter()
        .filter_map(|id| tree.path(id).map(Path::to_path_buf))
        .collect()
}

pub fn shows(project: &Project, path: &Path) -> bool {
    node_paths(project).iter().any(|p| p == path)
}

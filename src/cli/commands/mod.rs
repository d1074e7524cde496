//! Command implementations for the CLI.

pub mod edit;
pub mod init;
pub mod plugins;
pub mod show;
pub mod watch;

use std::path::Path;

use anyhow::Context;

use crate::config::Settings;
use crate::project::{Project, ProjectBuilder};

/// Open `pro_file` and evaluate it to completion.
pub(crate) fn open_project(pro_file: &Path, settings: &Settings, watch: bool) -> anyhow::Result<Project> {
    let mut project = ProjectBuilder::new(pro_file)
        .settings(settings.clone())
        .watch(watch)
        .build()
        .with_context(|| format!("Failed to open {}", pro_file.display()))?;
    let root = project.root();
    project.update(root)?;
    project.wait_for_evaluations();
    Ok(project)
}

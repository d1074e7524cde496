//! Build-file edits driven from the command line.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};

use super::open_project;
use crate::cli::EditAction;
use crate::config::Settings;
use crate::paths::{absolute_from, clean_path};
use crate::project::Project;
use crate::types::NodeId;

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(clean_path(&absolute_from(&cwd, path)))
}

fn absolute_all(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    paths.iter().map(|p| absolute(p)).collect()
}

/// The unit named by `--to`/`--from`, or `fallback` when none was given.
fn pick_unit(
    project: &Project,
    explicit: Option<&Path>,
    fallback: impl FnOnce(&Project) -> NodeId,
) -> anyhow::Result<NodeId> {
    match explicit {
        Some(file) => {
            let file = absolute(file)?;
            project
                .find_unit_for_file(&file)
                .ok_or_else(|| anyhow!("{} is not a unit of this project", file.display()))
        }
        None => Ok(fallback(project)),
    }
}

fn report(verb: &str, failed: &[PathBuf]) {
    for file in failed {
        eprintln!("Not {verb}: {}", file.display());
    }
}

pub fn run(pro_file: &Path, action: EditAction, settings: &Settings) -> anyhow::Result<()> {
    let mut project = open_project(pro_file, settings, false)?;

    match action {
        EditAction::Add { files, to } => {
            let files = absolute_all(&files)?;
            let unit = pick_unit(&project, to.as_deref(), Project::root)?;
            let not_added = project.add_files(unit, &files)?;
            report("added", &not_added);
        }
        EditAction::Remove {
            files,
            from,
            delete,
        } => {
            let files = absolute_all(&files)?;
            let first = files.first().cloned().unwrap_or_default();
            let unit = pick_unit(&project, from.as_deref(), |p| p.unit_for_edit(&first))?;
            if delete {
                project.delete_files(unit, &files)?;
                for file in &files {
                    if let Err(e) = std::fs::remove_file(file) {
                        eprintln!("Failed to delete {}: {e}", file.display());
                    }
                }
            } else {
                let not_removed = project.remove_files(unit, &files)?;
                report("removed", &not_removed);
            }
        }
        EditAction::Rename { old, new } => {
            let old = absolute(&old)?;
            let new = absolute(&new)?;
            let unit = project.unit_for_edit(&old);
            if !project.rename_file(unit, &old, &new)? {
                bail!("Failed to rename {} in the build files", old.display());
            }
        }
        EditAction::AddSubdir { pro_files, to } => {
            let pro_files = absolute_all(&pro_files)?;
            let unit = pick_unit(&project, to.as_deref(), Project::root)?;
            let not_added = project.add_sub_projects(unit, &pro_files)?;
            report("added", &not_added);
        }
        EditAction::RemoveSubdir { pro_files, from } => {
            let pro_files = absolute_all(&pro_files)?;
            let unit = pick_unit(&project, from.as_deref(), Project::root)?;
            let not_removed = project.remove_sub_projects(unit, &pro_files)?;
            report("removed", &not_removed);
        }
        EditAction::SetVar {
            variable,
            value,
            r#in,
        } => {
            let unit = pick_unit(&project, r#in.as_deref(), Project::root)?;
            project.set_pro_variable(unit, &variable, &value)?;
        }
    }

    project.wait_for_evaluations();
    print!("{}", project.tree().render(project.root()));
    Ok(())
}

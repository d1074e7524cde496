//! Read-only views of a loaded project: tree, unit info and variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use serde::Serialize;

use super::open_project;
use crate::config::Settings;
use crate::paths::{absolute_from, clean_path};
use crate::project::{InstallsList, TargetInformation};
use crate::types::ProjectType;

pub fn run_tree(pro_file: &Path, settings: &Settings) -> anyhow::Result<()> {
    let project = open_project(pro_file, settings, false)?;
    print!("{}", project.tree().render(project.root()));
    Ok(())
}

#[derive(Serialize)]
struct UnitInfo {
    file: PathBuf,
    project_type: ProjectType,
    valid_parse: bool,
    parse_in_progress: bool,
    deployable: bool,
    target: TargetInformation,
    installs: InstallsList,
    ui_headers: Vec<PathBuf>,
}

pub fn run_info(pro_file: &Path, json: bool, settings: &Settings) -> anyhow::Result<()> {
    let project = open_project(pro_file, settings, false)?;
    let units: Vec<UnitInfo> = project
        .pro_units()
        .into_iter()
        .filter_map(|id| project.pro_unit(id))
        .map(|unit| UnitInfo {
            file: unit.file().to_path_buf(),
            project_type: unit.project_type(),
            valid_parse: unit.valid_parse(),
            parse_in_progress: unit.parse_in_progress(),
            deployable: unit.is_deployable(),
            target: unit.target_information().clone(),
            installs: unit.installs_list().clone(),
            ui_headers: unit.ui_files().values().cloned().collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }

    for unit in &units {
        let state = match (unit.valid_parse, unit.parse_in_progress) {
            (_, true) => "parsing",
            (true, false) => "ok",
            (false, false) => "failed",
        };
        println!("{} [{}] {}", unit.file.display(), unit.project_type, state);
        if unit.target.valid {
            println!("  target:  {} in {}", unit.target.target, unit.target.destdir.display());
        }
        if unit.deployable {
            println!("  deployable");
        }
        for item in &unit.installs.items {
            println!("  install: {} ({} files)", item.path.display(), item.files.len());
        }
        for header in &unit.ui_headers {
            println!("  ui:      {}", header.display());
        }
    }
    Ok(())
}

pub fn run_vars(
    pro_file: &Path,
    unit: Option<&Path>,
    json: bool,
    settings: &Settings,
) -> anyhow::Result<()> {
    let project = open_project(pro_file, settings, false)?;
    let id = match unit {
        Some(path) => {
            let cwd = std::env::current_dir()?;
            let wanted = clean_path(&absolute_from(&cwd, path));
            project
                .find_pro_file_for(&wanted)
                .ok_or_else(|| anyhow!("{} is not part of this project", wanted.display()))?
        }
        None => project.root(),
    };
    let pro = project
        .pro_unit(id)
        .ok_or_else(|| anyhow!("unit {id} is not a .pro unit"))?;

    if json {
        let table: BTreeMap<String, &Vec<String>> = pro
            .variables()
            .iter()
            .map(|(var, values)| (var.to_string(), values))
            .collect();
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    for (var, values) in pro.variables() {
        if values.is_empty() {
            continue;
        }
        println!("{var}:");
        for value in values {
            println!("  {value}");
        }
    }
    Ok(())
}

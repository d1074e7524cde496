//! `.pro` units and the evaluate/apply cycle.
//!
//! A `.pro` unit is a `.pri` unit plus build information. Evaluating it
//! yields an exact and a cumulative reader; applying that outcome merges
//! the unit's `.pri` includes and `SUBDIRS` children, syncs its files and
//! refreshes the variable table.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::engine::{Project, Unit};
use super::error::{ProjectError, ProjectResult};
use super::merge::merge_sub_units;
use super::pri::{PriInput, PriUnit};
use super::variables::{
    ExtractionInput, InstallsList, TargetInformation, Variable, VariableTable, dedup_in_order,
    is_deployable,
};
use crate::evaluation::{
    EvalRequest, EvalResult, EvaluationOutcome, EvaluationReader, evaluate,
};
use crate::paths::{absolute_from, base_name, clean_path};
use crate::types::{FileType, NodeId, ProjectType};

#[derive(Debug, Clone)]
pub struct ProUnit {
    pri: PriUnit,
    build_dir: PathBuf,
    project_type: ProjectType,
    valid_parse: bool,
    parse_in_progress: bool,
    variables: VariableTable,
    target_information: TargetInformation,
    installs_list: InstallsList,
    sub_projects_not_to_deploy: Vec<PathBuf>,
    ui_files: BTreeMap<PathBuf, PathBuf>,
    deployable: bool,
}

impl ProUnit {
    /// A unit that has never been evaluated: invalid and in progress.
    pub fn new(node: NodeId, file: PathBuf, build_dir: PathBuf) -> Self {
        Self {
            pri: PriUnit::new(node, node, file),
            build_dir,
            project_type: ProjectType::Invalid,
            valid_parse: false,
            parse_in_progress: true,
            variables: VariableTable::new(),
            target_information: TargetInformation::default(),
            installs_list: InstallsList::default(),
            sub_projects_not_to_deploy: Vec::new(),
            ui_files: BTreeMap::new(),
            deployable: false,
        }
    }

    pub fn pri(&self) -> &PriUnit {
        &self.pri
    }

    pub fn pri_mut(&mut self) -> &mut PriUnit {
        &mut self.pri
    }

    pub fn file(&self) -> &Path {
        self.pri.file()
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn project_type(&self) -> ProjectType {
        self.project_type
    }

    pub fn valid_parse(&self) -> bool {
        self.valid_parse
    }

    pub fn parse_in_progress(&self) -> bool {
        self.parse_in_progress
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn variable(&self, variable: Variable) -> &[String] {
        self.variables
            .get(&variable)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn single_variable(&self, variable: Variable) -> Option<&str> {
        self.variable(variable).first().map(String::as_str)
    }

    pub fn target_information(&self) -> &TargetInformation {
        &self.target_information
    }

    pub fn installs_list(&self) -> &InstallsList {
        &self.installs_list
    }

    /// `SUBDIRS` entries marked `no_default_target`.
    pub fn sub_projects_not_to_deploy(&self) -> &[PathBuf] {
        &self.sub_projects_not_to_deploy
    }

    /// Form file to the header `uic` generates for it.
    pub fn ui_files(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.ui_files
    }

    pub fn is_deployable(&self) -> bool {
        self.deployable
    }

    pub fn has_build_targets(&self) -> bool {
        self.project_type.has_build_targets()
    }

    pub fn is_debug_and_release(&self) -> bool {
        self.variable(Variable::Config)
            .iter()
            .any(|value| value == "debug_and_release")
    }

    pub fn object_extension(&self) -> String {
        match self.single_variable(Variable::ObjectExt) {
            Some(ext) => ext.to_string(),
            None if cfg!(windows) => ".obj".to_string(),
            None => ".o".to_string(),
        }
    }

    pub fn makefile(&self) -> Option<&str> {
        self.single_variable(Variable::Makefile)
    }

    /// `OBJECTS_DIR`, relative values resolved against the build directory.
    pub fn objects_directory(&self) -> Option<PathBuf> {
        let dir = self.single_variable(Variable::ObjectsDir)?;
        Some(absolute_from(&self.build_dir, Path::new(dir)))
    }

    /// `DEFINES` rendered as preprocessor lines.
    pub fn cxx_defines(&self) -> String {
        let mut out = String::new();
        for define in self.variable(Variable::Defines) {
            match define.split_once('=') {
                Some((name, value)) => {
                    out.push_str(&format!("#define {name} {value}\n"));
                }
                None => out.push_str(&format!("#define {define} 1\n")),
            }
        }
        out
    }
}

/// Paths of the `.pro` files named by `SUBDIRS`.
///
/// Entries may name a `.pro` file, a directory holding `<dir>.pro`, or a
/// variable whose `.subdir`/`.file` says which. Entries with
/// `no_default_target` in their `.CONFIG` are also pushed to
/// `not_to_deploy`.
pub fn subdirs_paths(
    reader: &dyn EvaluationReader,
    pro_dir: &Path,
    mut not_to_deploy: Option<&mut Vec<PathBuf>>,
    silent: bool,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for entry in reader.values("SUBDIRS") {
        let subdir = reader.value(&format!("{entry}.subdir"));
        let named = if !subdir.is_empty() {
            subdir
        } else {
            match reader.value(&format!("{entry}.file")) {
                file if file.is_empty() => entry.clone(),
                file => file,
            }
        };

        let mut path = absolute_from(pro_dir, Path::new(&named));
        if path.is_dir() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            path = path.join(format!("{name}.pro"));
        }

        if path.exists() {
            let path = clean_path(&path);
            let config = reader.values(&format!("{entry}.CONFIG"));
            if config.iter().any(|c| c == "no_default_target") {
                if let Some(list) = not_to_deploy.as_deref_mut() {
                    list.push(path.clone());
                }
            }
            paths.push(path);
        } else if !silent {
            tracing::warn!(
                target: "project",
                "could not find .pro file for subdirectory '{entry}' in {}",
                pro_dir.display()
            );
        }
    }
    dedup_in_order(&mut paths);
    paths
}

/// Sub-unit candidates found by one evaluation pass.
#[derive(Default)]
struct Candidates {
    all: Vec<PathBuf>,
    subdirs: HashSet<PathBuf>,
    includes: HashSet<PathBuf>,
    includes_self: bool,
}

impl Candidates {
    fn collect(
        reader: &dyn EvaluationReader,
        own_file: &Path,
        pro_dir: &Path,
        project_type: ProjectType,
        not_to_deploy: Option<&mut Vec<PathBuf>>,
    ) -> Self {
        let mut found = Self::default();
        if project_type == ProjectType::SubDirs {
            let silent = not_to_deploy.is_none();
            for path in subdirs_paths(reader, pro_dir, not_to_deploy, silent) {
                found.subdirs.insert(path.clone());
                found.all.push(path);
            }
        }
        for include in reader.include_files() {
            if include == own_file {
                found.includes_self = true;
            } else if found.includes.insert(include.clone()) {
                found.all.push(include);
            }
        }
        found
    }
}

impl Project {
    /// Re-evaluate the `.pro` unit owning `unit` and everything below it,
    /// blocking until done.
    pub fn update(&mut self, unit: NodeId) -> ProjectResult<()> {
        let pro = self.owning_pro(unit).ok_or(ProjectError::UnknownUnit(unit))?;
        self.cancelled = false;
        self.update_sync(pro);
        Ok(())
    }

    fn update_sync(&mut self, unit: NodeId) {
        if let Some(task) = self.tasks.remove(&unit) {
            task.cancel();
            drop(task.finish());
        }
        let Some(request) = self.eval_request(unit) else {
            return;
        };
        self.set_parse_in_progress_recursive(unit, true);
        let outcome = evaluate(self.scheduler.factory(), &request);
        self.apply_evaluate(unit, Some(outcome), false);
    }

    fn eval_request(&self, unit: NodeId) -> Option<EvalRequest> {
        let pro = self.pro_unit(unit)?;
        Some(EvalRequest {
            unit,
            pro_file: pro.file().to_path_buf(),
            build_dir: pro.build_dir().to_path_buf(),
        })
    }

    /// Start evaluating `unit` on the pool. An evaluation already running
    /// for it is cancelled and its result discarded.
    pub(super) fn async_update(&mut self, unit: NodeId) {
        if let Some(task) = self.tasks.remove(&unit) {
            task.cancel();
            drop(task.finish());
        }
        let Some(request) = self.eval_request(unit) else {
            return;
        };
        self.set_parse_in_progress(unit, true);
        let task = self.scheduler.dispatch(request);
        self.tasks.insert(unit, task);
    }

    /// Queue an evaluation of the `.pro` unit owning `unit`. Queued units
    /// covered by an ancestor are dropped; the work starts on the next
    /// [`Project::process_evaluations`].
    pub fn schedule_update(&mut self, unit: NodeId) -> ProjectResult<()> {
        let pro = self.owning_pro(unit).ok_or(ProjectError::UnknownUnit(unit))?;
        self.cancelled = false;
        self.set_parse_in_progress_recursive(pro, true);

        let covered = self
            .scheduled
            .iter()
            .any(|&queued| queued == pro || self.tree.ancestors(pro).any(|a| a == queued));
        if !covered {
            let tree = &self.tree;
            self.scheduled
                .retain(|&queued| !tree.ancestors(queued).any(|a| a == pro));
            self.scheduled.push(pro);
        }
        Ok(())
    }

    /// Start queued evaluations and apply every outcome that has arrived.
    /// Returns the number of outcomes applied.
    pub fn process_evaluations(&mut self) -> usize {
        for unit in std::mem::take(&mut self.scheduled) {
            if self.units.contains_key(&unit) {
                self.async_update(unit);
            }
        }

        let mut applied = 0;
        let running: Vec<NodeId> = self.tasks.keys().copied().collect();
        for unit in running {
            // An earlier apply may have removed it.
            let Some(mut task) = self.tasks.remove(&unit) else {
                continue;
            };
            match task.try_take() {
                Ok(Some(outcome)) => {
                    self.apply_evaluate(unit, Some(outcome), true);
                    drop(task);
                    applied += 1;
                }
                Ok(None) => {
                    self.tasks.insert(unit, task);
                }
                Err(e) => {
                    tracing::warn!(target: "evaluation", "{e}");
                    self.apply_evaluate(unit, None, true);
                    drop(task);
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Keep processing until nothing is queued or running.
    pub fn wait_for_evaluations(&mut self) {
        loop {
            self.process_evaluations();
            let Some(&unit) = self.tasks.keys().next() else {
                if self.scheduled.is_empty() {
                    break;
                }
                continue;
            };
            let Some(mut task) = self.tasks.remove(&unit) else {
                continue;
            };
            match task.wait(Duration::from_millis(50)) {
                Ok(Some(outcome)) => {
                    self.apply_evaluate(unit, Some(outcome), true);
                    drop(task);
                }
                Ok(None) => {
                    self.tasks.insert(unit, task);
                }
                Err(e) => {
                    tracing::warn!(target: "evaluation", "{e}");
                    self.apply_evaluate(unit, None, true);
                    drop(task);
                }
            }
        }
    }

    /// Cancel everything queued or running. Affected units end up invalid
    /// and no longer in progress.
    pub fn cancel_evaluations(&mut self) {
        self.cancelled = true;
        for task in self.tasks.values() {
            task.cancel();
        }
        for unit in std::mem::take(&mut self.scheduled) {
            self.set_valid_parse_recursive(unit, false);
            self.set_parse_in_progress_recursive(unit, false);
        }
        crate::log_event!("evaluation", "cancelled", "{} running", self.tasks.len());
    }

    pub fn pending_evaluations(&self) -> usize {
        self.scheduler.pending() + self.scheduled.len()
    }

    fn sub_pro_units(&self, unit: NodeId) -> Vec<NodeId> {
        self.tree
            .project_children(unit)
            .map(|(id, _)| id)
            .filter(|id| self.units.get(id).is_some_and(Unit::is_pro))
            .collect()
    }

    /// Set the flag on `unit` alone, notifying listeners on change.
    pub(super) fn set_parse_in_progress(&mut self, unit: NodeId, value: bool) {
        let Some(pro) = self.pro_unit_mut(unit) else {
            return;
        };
        if pro.parse_in_progress == value {
            return;
        }
        pro.parse_in_progress = value;
        let valid = pro.valid_parse;
        self.listeners.pro_file_updated(unit, valid, value);
    }

    pub(super) fn set_parse_in_progress_recursive(&mut self, unit: NodeId, value: bool) {
        self.set_parse_in_progress(unit, value);
        for sub in self.sub_pro_units(unit) {
            self.set_parse_in_progress_recursive(sub, value);
        }
    }

    pub(super) fn set_valid_parse_recursive(&mut self, unit: NodeId, value: bool) {
        if let Some(pro) = self.pro_unit_mut(unit) {
            pro.valid_parse = value;
        }
        for sub in self.sub_pro_units(unit) {
            self.set_valid_parse_recursive(sub, value);
        }
    }

    /// Whether `path` is `unit` itself or one of the units above it.
    fn is_loop(&self, unit: NodeId, path: &Path) -> bool {
        std::iter::once(unit)
            .chain(self.tree.ancestors(unit))
            .filter_map(|id| self.units.get(&id))
            .any(|u| u.file() == path)
    }

    fn set_project_type(&mut self, unit: NodeId, project_type: ProjectType) {
        let Some(pro) = self.pro_unit_mut(unit) else {
            return;
        };
        let old = pro.project_type;
        if old == project_type {
            return;
        }
        pro.project_type = project_type;
        self.listeners.project_type_changed(unit, old, project_type);
    }

    fn apply_failure(&mut self, unit: NodeId, failed: bool) {
        self.set_valid_parse_recursive(unit, false);
        self.set_parse_in_progress_recursive(unit, false);
        if !failed {
            return;
        }
        let Some(pro) = self.pro_unit(unit) else {
            return;
        };
        tracing::warn!(target: "project", "error while parsing {}, giving up", pro.file().display());
        if pro.project_type == ProjectType::Invalid {
            return;
        }
        self.clear_unit(unit);
        if let Some(pro) = self.pro_unit_mut(unit) {
            pro.ui_files.clear();
        }
        self.set_project_type(unit, ProjectType::Invalid);
    }

    /// Fold an evaluation outcome into the tree. `outcome` is `None` when
    /// the worker never produced one.
    pub(super) fn apply_evaluate(
        &mut self,
        unit: NodeId,
        outcome: Option<EvaluationOutcome>,
        run_async: bool,
    ) {
        if self.pro_unit(unit).is_none() {
            return;
        }
        let outcome = match outcome {
            _ if self.cancelled => {
                self.apply_failure(unit, false);
                return;
            }
            Some(outcome) if outcome.result != EvalResult::Fail => outcome,
            _ => {
                self.apply_failure(unit, true);
                return;
            }
        };

        let result = outcome.result;
        let exact: &dyn EvaluationReader = outcome.exact.as_ref();
        let cumulative: &dyn EvaluationReader = outcome.cumulative.as_ref();
        if result == EvalResult::Partial {
            tracing::warn!(
                target: "project",
                "{} evaluated only partially; keeping previous build information",
                outcome.request.pro_file.display()
            );
        }

        let project_type = match result {
            EvalResult::Ok => exact.template_type().project_type(),
            _ => cumulative.template_type().project_type(),
        };
        let (pro_file, build_dir, included) = match self.pro_unit(unit) {
            Some(pro) => (
                pro.file().to_path_buf(),
                pro.build_dir.clone(),
                pro.pri.included_in_exact_parse(),
            ),
            None => return,
        };
        let pro_dir = pro_file.parent().map(Path::to_path_buf).unwrap_or_default();

        if self.pro_unit(unit).map(ProUnit::project_type) != Some(project_type) {
            for sub in self.sub_pro_units(unit) {
                self.set_valid_parse_recursive(sub, false);
                self.set_parse_in_progress_recursive(sub, false);
            }
            self.clear_unit(unit);
            self.set_project_type(unit, project_type);
        }

        let mut not_to_deploy = Vec::new();
        let exact_found = match result {
            EvalResult::Ok => Candidates::collect(
                exact,
                &pro_file,
                &pro_dir,
                project_type,
                Some(&mut not_to_deploy),
            ),
            _ => Candidates::default(),
        };
        let cumulative_found =
            Candidates::collect(cumulative, &pro_file, &pro_dir, project_type, None);

        let existing: Vec<(PathBuf, NodeId)> = self
            .tree
            .project_children(unit)
            .map(|(id, node)| (node.path.clone(), id))
            .collect();
        let plan = merge_sub_units(&existing, &exact_found.all, &cumulative_found.all);
        let suffix = self.evaluation.deployment_files_suffix();

        let mut stale = plan.remove;
        let mut to_add = plan.add;
        for (child, found) in plan.update {
            let in_exact = exact_found.includes.contains(&found.path);
            let in_cumulative = cumulative_found.includes.contains(&found.path);
            let is_include = in_exact || in_cumulative;
            match self.units.get_mut(&child) {
                Some(Unit::Pri(pri)) if is_include => {
                    pri.set_included_in_exact_parse(in_exact && included);
                    pri.update(
                        &mut self.tree,
                        &mut self.watch,
                        PriInput {
                            exact: in_exact.then_some(exact),
                            cumulative: in_cumulative.then_some(cumulative),
                            pro_dir: &pro_dir,
                            build_dir: &build_dir,
                            deployment_suffix: suffix,
                        },
                    );
                }
                Some(Unit::Pro(pro)) if !is_include => {
                    pro.pri
                        .set_included_in_exact_parse(exact_found.subdirs.contains(&found.path) && included);
                    if run_async {
                        self.async_update(child);
                    } else {
                        self.update_sync(child);
                    }
                }
                // The file changed roles; rebuild it.
                _ => {
                    stale.push(child);
                    to_add.push(found);
                }
            }
        }

        for &child in &stale {
            if self.units.get(&child).is_some_and(Unit::is_pro) {
                self.set_valid_parse_recursive(child, false);
                self.set_parse_in_progress_recursive(child, false);
            }
        }
        self.remove_nodes(unit, &stale);

        let mut attached = Vec::new();
        let mut new_pros = Vec::new();
        for found in to_add {
            if self.is_loop(unit, &found.path) {
                tracing::warn!(
                    target: "project",
                    "{} includes itself; ignoring the include",
                    found.path.display()
                );
                continue;
            }
            let in_exact = exact_found.includes.contains(&found.path);
            let in_cumulative = cumulative_found.includes.contains(&found.path);
            let node = self.create_unit_node(&found.path);
            if in_exact || in_cumulative {
                let mut pri = PriUnit::new(node, unit, found.path.clone());
                pri.set_included_in_exact_parse(in_exact && included);
                pri.update(
                    &mut self.tree,
                    &mut self.watch,
                    PriInput {
                        exact: in_exact.then_some(exact),
                        cumulative: in_cumulative.then_some(cumulative),
                        pro_dir: &pro_dir,
                        build_dir: &build_dir,
                        deployment_suffix: suffix,
                    },
                );
                self.units.insert(node, Unit::Pri(pri));
            } else {
                let sub_build_dir = self.build_dir_for(&found.path);
                let mut pro = ProUnit::new(node, found.path.clone(), sub_build_dir);
                pro.pri
                    .set_included_in_exact_parse(exact_found.subdirs.contains(&found.path) && included);
                self.units.insert(node, Unit::Pro(Box::new(pro)));
                new_pros.push(node);
            }
            self.watch.watch_build_file(&found.path);
            attached.push(node);
        }
        self.tree.attach(unit, &attached);
        for node in new_pros {
            if run_async {
                self.async_update(node);
            } else {
                self.update_sync(node);
            }
        }

        if let Some(Unit::Pro(pro)) = self.units.get_mut(&unit) {
            pro.pri.update(
                &mut self.tree,
                &mut self.watch,
                PriInput {
                    exact: (result == EvalResult::Ok && exact_found.includes_self).then_some(exact),
                    cumulative: cumulative_found.includes_self.then_some(cumulative),
                    pro_dir: &pro_dir,
                    build_dir: &build_dir,
                    deployment_suffix: suffix,
                },
            );
            pro.valid_parse = true;
        }

        if result == EvalResult::Ok {
            let table = ExtractionInput {
                exact,
                cumulative,
                project_dir: &pro_dir,
                build_dir: &build_dir,
            }
            .extract();
            let mut changed = None;
            if let Some(pro) = self.pro_unit_mut(unit) {
                pro.target_information = TargetInformation::from_reader(exact, &pro_file, &build_dir);
                pro.installs_list = InstallsList::from_reader(exact, &pro_dir);
                pro.sub_projects_not_to_deploy = not_to_deploy;
                pro.deployable = is_deployable(project_type, exact);
                if pro.variables != table {
                    changed = Some(std::mem::replace(&mut pro.variables, table));
                }
            }
            if let (Some(old), Some(pro)) = (changed, self.pro_unit(unit)) {
                self.listeners.variables_changed(unit, &old, &pro.variables);
            }
        }

        self.update_ui_files(unit);
        // Listeners see the finished state only once everything is applied.
        self.set_parse_in_progress(unit, false);
        crate::debug_event!(
            "project",
            "applied",
            "{} ({project_type}, {result:?})",
            pro_file.display()
        );
    }

    /// Map each form of a buildable unit to its generated header.
    fn update_ui_files(&mut self, unit: NodeId) {
        let Some(pro) = self.pro_unit(unit) else {
            return;
        };
        let mut ui_files = BTreeMap::new();
        if pro.has_build_targets() {
            let ui_dir = pro
                .single_variable(Variable::UiDir)
                .map(PathBuf::from)
                .unwrap_or_else(|| pro.build_dir.clone());
            for form in self.files_of_type(unit, FileType::Form) {
                let header = ui_dir.join(format!("ui_{}.h", base_name(&form)));
                ui_files.insert(form, header);
            }
        }
        if let Some(pro) = self.pro_unit_mut(unit) {
            pro.ui_files = ui_files;
        }
    }

    /// Files of `file_type` shown under `unit` and its `.pri` includes,
    /// not descending into nested `.pro` units.
    pub fn files_of_type(&self, unit: NodeId, file_type: FileType) -> Vec<PathBuf> {
        let mut units = vec![unit];
        let mut files = Vec::new();
        while let Some(current) = units.pop() {
            for id in self.tree.files_in_unit(current) {
                if let Some(node) = self.tree.get(id) {
                    if node.file_type() == Some(file_type) {
                        files.push(node.path.clone());
                    }
                }
            }
            units.extend(
                self.tree
                    .project_children(current)
                    .map(|(id, _)| id)
                    .filter(|id| matches!(self.units.get(id), Some(Unit::Pri(_)))),
            );
        }
        files.sort();
        files.dedup();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> ProUnit {
        ProUnit::new(NodeId::new(1).unwrap(), PathBuf::from("/p/app.pro"), PathBuf::from("/b"))
    }

    #[test]
    fn test_cxx_defines() {
        let mut pro = unit();
        pro.variables.insert(
            Variable::Defines,
            vec!["QT_DEBUG".to_string(), "VERSION=\"1.0\"".to_string()],
        );
        assert_eq!(pro.cxx_defines(), "#define QT_DEBUG 1\n#define VERSION \"1.0\"\n");
    }

    #[test]
    fn test_build_paths() {
        let mut pro = unit();
        assert_eq!(pro.makefile(), None);
        assert!(pro.objects_directory().is_none());
        pro.variables
            .insert(Variable::ObjectsDir, vec!["obj".to_string()]);
        pro.variables
            .insert(Variable::Config, vec!["qt".to_string(), "debug_and_release".to_string()]);
        assert_eq!(pro.objects_directory(), Some(PathBuf::from("/b/obj")));
        assert!(pro.is_debug_and_release());
        assert!(!pro.object_extension().is_empty());
    }
}

//! The loaded project: node arena, units and their collaborators.
//!
//! Everything here runs on the owning thread. Evaluations run on the
//! scheduler's pool and come back through [`Project::process_evaluations`];
//! filesystem changes come back through [`Project::poll_watcher`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::error::{ProjectError, ProjectResult};
use super::observer::{Listeners, ProjectListener, SubscriptionId};
use super::pri::PriUnit;
use super::pro::ProUnit;
use crate::config::{EvaluationConfig, Settings};
use crate::evaluation::{EvaluationScheduler, EvaluationTask, QmakeReaderFactory, ReaderFactory};
use crate::paths::{base_name, clean_path, relative_to};
use crate::tree::{NodeKind, NodeTree, TreeObserver};
use crate::types::NodeId;
use crate::watcher::{FolderWatchCoordinator, WatchEvent, recursive_enumerate};
use crate::writer::{
    DocumentHost, FormResources, HeadlessDocuments, NoVersionControl, VersionControl,
    XmlFormResources,
};

/// A `.pri` include or a `.pro` project in the tree.
#[derive(Debug, Clone)]
pub enum Unit {
    Pri(PriUnit),
    Pro(Box<ProUnit>),
}

impl Unit {
    pub fn pri(&self) -> &PriUnit {
        match self {
            Unit::Pri(pri) => pri,
            Unit::Pro(pro) => pro.pri(),
        }
    }

    pub fn pri_mut(&mut self) -> &mut PriUnit {
        match self {
            Unit::Pri(pri) => pri,
            Unit::Pro(pro) => pro.pri_mut(),
        }
    }

    pub fn as_pro(&self) -> Option<&ProUnit> {
        match self {
            Unit::Pro(pro) => Some(pro),
            Unit::Pri(_) => None,
        }
    }

    pub fn as_pro_mut(&mut self) -> Option<&mut ProUnit> {
        match self {
            Unit::Pro(pro) => Some(pro),
            Unit::Pri(_) => None,
        }
    }

    pub fn is_pro(&self) -> bool {
        matches!(self, Unit::Pro(_))
    }

    pub fn file(&self) -> &Path {
        self.pri().file()
    }
}

pub struct ProjectBuilder {
    pro_file: PathBuf,
    settings: Settings,
    factory: Option<Arc<dyn ReaderFactory>>,
    documents: Arc<dyn DocumentHost>,
    vcs: Arc<dyn VersionControl>,
    forms: Arc<dyn FormResources>,
    watch: bool,
}

impl ProjectBuilder {
    pub fn new(pro_file: impl Into<PathBuf>) -> Self {
        Self {
            pro_file: pro_file.into(),
            settings: Settings::default(),
            factory: None,
            documents: Arc::new(HeadlessDocuments),
            vcs: Arc::new(NoVersionControl),
            forms: Arc::new(XmlFormResources),
            watch: false,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the built-in qmake reader.
    pub fn reader_factory(mut self, factory: Arc<dyn ReaderFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn document_host(mut self, documents: Arc<dyn DocumentHost>) -> Self {
        self.documents = documents;
        self
    }

    pub fn version_control(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = vcs;
        self
    }

    pub fn form_resources(mut self, forms: Arc<dyn FormResources>) -> Self {
        self.forms = forms;
        self
    }

    /// Install live filesystem watches, subject to `watch.enabled`.
    pub fn watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    /// Create the root unit. Nothing is evaluated yet.
    pub fn build(self) -> ProjectResult<Project> {
        let pro_file = if self.pro_file.is_absolute() {
            clean_path(&self.pro_file)
        } else {
            let cwd = std::env::current_dir().unwrap_or_default();
            clean_path(&cwd.join(&self.pro_file))
        };
        if !pro_file.is_file() {
            return Err(ProjectError::NotFound(pro_file));
        }

        let evaluation = self.settings.evaluation.clone();
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(QmakeReaderFactory::new(&evaluation)));
        let scheduler = EvaluationScheduler::new(evaluation.worker_threads, factory)?;
        let watch = if self.watch && self.settings.watch.enabled {
            FolderWatchCoordinator::with_watcher(self.settings.watch.debounce_ms)?
        } else {
            FolderWatchCoordinator::detached()
        };

        let mut tree = NodeTree::new();
        let root = tree.create(NodeKind::Project, pro_file.clone(), base_name(&pro_file));
        let root_dir = pro_file.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut project = Project {
            tree,
            root,
            root_dir,
            units: HashMap::new(),
            evaluation,
            scheduler,
            watch,
            listeners: Listeners::default(),
            documents: self.documents,
            vcs: self.vcs,
            forms: self.forms,
            cancelled: false,
            scheduled: Vec::new(),
            tasks: BTreeMap::new(),
        };
        let build_dir = project.build_dir_for(&pro_file);
        project
            .units
            .insert(root, Unit::Pro(Box::new(ProUnit::new(root, pro_file.clone(), build_dir))));
        project.watch.watch_build_file(&pro_file);

        crate::log_event!("project", "opened", "{}", pro_file.display());
        Ok(project)
    }
}

pub struct Project {
    pub(super) tree: NodeTree,
    pub(super) root: NodeId,
    pub(super) root_dir: PathBuf,
    pub(super) units: HashMap<NodeId, Unit>,
    pub(super) evaluation: EvaluationConfig,
    pub(super) scheduler: EvaluationScheduler,
    pub(super) watch: FolderWatchCoordinator,
    pub(super) listeners: Listeners,
    pub(super) documents: Arc<dyn DocumentHost>,
    pub(super) vcs: Arc<dyn VersionControl>,
    pub(super) forms: Arc<dyn FormResources>,
    /// Set by [`Project::cancel_evaluations`]; outcomes arriving while set
    /// are discarded.
    pub(super) cancelled: bool,
    pub(super) scheduled: Vec<NodeId>,
    pub(super) tasks: BTreeMap<NodeId, EvaluationTask>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("units", &self.units.len())
            .field("nodes", &self.tree.len())
            .field("pending", &self.pending_evaluations())
            .finish()
    }
}

impl Project {
    /// Build with `settings` and evaluate the whole tree synchronously.
    pub fn load(pro_file: impl Into<PathBuf>, settings: Settings) -> ProjectResult<Self> {
        let mut project = ProjectBuilder::new(pro_file).settings(settings).build()?;
        project.update(project.root)?;
        Ok(project)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_pro_file(&self) -> &Path {
        self.units
            .get(&self.root)
            .map(Unit::file)
            .unwrap_or(Path::new(""))
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn add_tree_observer(&mut self, observer: Arc<dyn TreeObserver>) {
        self.tree.add_observer(observer);
    }

    pub fn evaluation_config(&self) -> &EvaluationConfig {
        &self.evaluation
    }

    pub fn subscribe(&mut self, listener: Arc<dyn ProjectListener>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn unit(&self, id: NodeId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn pro_unit(&self, id: NodeId) -> Option<&ProUnit> {
        self.units.get(&id).and_then(Unit::as_pro)
    }

    pub fn pri_unit(&self, id: NodeId) -> Option<&PriUnit> {
        self.units.get(&id).map(Unit::pri)
    }

    pub(super) fn pro_unit_mut(&mut self, id: NodeId) -> Option<&mut ProUnit> {
        self.units.get_mut(&id).and_then(Unit::as_pro_mut)
    }

    /// Every `.pro` unit, ordered by file path.
    pub fn pro_units(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .units
            .iter()
            .filter(|(_, unit)| unit.is_pro())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_by(|a, b| self.units[a].file().cmp(self.units[b].file()));
        ids
    }

    /// The `.pro` unit built from `pro_file`, if it is part of the tree.
    pub fn find_pro_file_for(&self, pro_file: &Path) -> Option<NodeId> {
        let wanted = clean_path(pro_file);
        self.pro_units()
            .into_iter()
            .find(|id| self.units[id].file() == wanted)
    }

    /// Any unit, `.pro` or `.pri`, built from `file`. The outermost wins when
    /// an include appears more than once.
    pub fn find_unit_for_file(&self, file: &Path) -> Option<NodeId> {
        let wanted = clean_path(file);
        let mut found: Vec<NodeId> = self
            .units
            .iter()
            .filter(|(_, unit)| unit.file() == wanted)
            .map(|(&id, _)| id)
            .collect();
        found.sort_by_key(|id| (self.tree.ancestors(*id).count(), *id));
        found.into_iter().next()
    }

    /// The `.pro` unit whose evaluation covers `unit`.
    pub fn owning_pro(&self, unit: NodeId) -> Option<NodeId> {
        match self.units.get(&unit)? {
            Unit::Pro(_) => Some(unit),
            Unit::Pri(pri) => Some(pri.owner()),
        }
    }

    /// Shadow build directory of a `.pro` file: the same relative location
    /// below the configured build root, or its own directory.
    pub fn build_dir_for(&self, pro_file: &Path) -> PathBuf {
        let pro_dir = pro_file.parent().unwrap_or(Path::new(""));
        let Some(build_root) = self.evaluation.build_root.as_ref() else {
            return pro_dir.to_path_buf();
        };
        match relative_to(pro_dir, &self.root_dir) {
            Some(rel) if !rel.starts_with("..") => clean_path(&build_root.join(rel)),
            _ => pro_dir.to_path_buf(),
        }
    }

    pub(super) fn create_unit_node(&mut self, file: &Path) -> NodeId {
        self.tree
            .create(NodeKind::Project, file.to_path_buf(), base_name(file))
    }

    /// Detach `nodes` from `parent`, tearing down every unit below them:
    /// in-flight evaluations are cancelled and watches released.
    pub(super) fn remove_nodes(&mut self, parent: NodeId, nodes: &[NodeId]) {
        if nodes.is_empty() {
            return;
        }
        for &node in nodes {
            let mut ids = vec![node];
            ids.extend(self.tree.descendants(node));
            for id in ids {
                self.drop_unit(id);
            }
        }
        self.tree.remove(parent, nodes);
    }

    fn drop_unit(&mut self, id: NodeId) {
        let Some(mut unit) = self.units.remove(&id) else {
            return;
        };
        if let Some(task) = self.tasks.remove(&id) {
            task.cancel();
            drop(task.finish());
        }
        self.scheduled.retain(|scheduled| *scheduled != id);
        unit.pri_mut().reset(&mut self.watch);

        let file = unit.file();
        if !self.units.values().any(|other| other.file() == file) {
            self.watch.unwatch_build_file(file);
        }
        crate::debug_event!("project", "unit removed", "{}", file.display());
    }

    /// Remove every child of `unit` and forget what it showed.
    pub(super) fn clear_unit(&mut self, unit: NodeId) {
        let children = self.tree.children(unit).to_vec();
        self.remove_nodes(unit, &children);
        if let Some(unit) = self.units.get_mut(&unit) {
            unit.pri_mut().reset(&mut self.watch);
        }
    }

    /// Apply a change below `changed`, a deployed folder or one of its
    /// subfolders, to every unit deploying it. Returns the units whose tree
    /// changed.
    pub fn folder_changed(&mut self, changed: &Path) -> usize {
        let units = self.watch.units_for_change(changed);
        if units.is_empty() {
            return 0;
        }
        let enumeration = recursive_enumerate(changed);
        let mut updated = 0;
        for id in units {
            if let Some(unit) = self.units.get_mut(&id) {
                if unit.pri_mut().folder_changed(&mut self.tree, changed, &enumeration) {
                    updated += 1;
                }
            }
        }
        updated
    }

    pub fn handle_watch_events(&mut self, events: Vec<WatchEvent>) -> usize {
        let mut handled = 0;
        for event in events {
            match event {
                WatchEvent::FolderChanged(folder) => {
                    handled += self.folder_changed(&folder);
                }
                WatchEvent::BuildFileChanged(file) => {
                    let Some(unit) = self.find_unit_for_file(&file) else {
                        continue;
                    };
                    crate::debug_event!("project", "build file changed", "{}", file.display());
                    if self.schedule_update(unit).is_ok() {
                        handled += 1;
                    }
                }
            }
        }
        handled
    }

    /// Drain pending watch events without blocking.
    pub fn poll_watcher(&mut self) -> usize {
        let events = self.watch.poll();
        self.handle_watch_events(events)
    }

    /// Block up to `timeout` for watch events, then handle them.
    pub fn wait_watcher(&mut self, timeout: Duration) -> ProjectResult<usize> {
        let events = self.watch.wait(timeout)?;
        Ok(self.handle_watch_events(events))
    }

    pub fn watched_folders(&self) -> Vec<PathBuf> {
        self.watch.watched_folders().map(Path::to_path_buf).collect()
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_live()
    }
}

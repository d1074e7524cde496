mod common;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{load, node_paths, shows, write};
use qmaketree::evaluation::ReaderFactory;
use qmaketree::project::Variable;
use qmaketree::types::NodeId;
use qmaketree::{ProjectListener, ProjectType};
use tempfile::TempDir;

#[test]
fn test_application_files_appear_in_tree() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(
        root,
        "app.pro",
        "TEMPLATE = app\nTARGET = demo\nSOURCES += main.cpp src/widget.cpp\nHEADERS += src/widget.h\n",
    );
    let main = write(root, "main.cpp", "int main() {}\n");
    let widget = write(root, "src/widget.cpp", "");
    let header = write(root, "src/widget.h", "");

    let project = load(&pro);
    let unit = project.pro_unit(project.root()).unwrap();
    assert_eq!(unit.project_type(), ProjectType::Application);
    assert!(unit.valid_parse());
    assert!(!unit.parse_in_progress());
    assert_eq!(unit.target_information().target, "demo");

    for file in [&pro, &main, &widget, &header] {
        assert!(shows(&project, file), "missing {}", file.display());
    }
    assert_eq!(unit.variable(Variable::Sources).len(), 2);
}

#[test]
fn test_missing_files_are_not_shown() {
    let dir = TempDir::new().unwrap();
    let pro = write(dir.path(), "app.pro", "SOURCES += main.cpp gone.cpp\n");
    let main = write(dir.path(), "main.cpp", "");

    let project = load(&pro);
    assert!(shows(&project, &main));
    assert!(!shows(&project, &dir.path().join("gone.cpp")));
}

#[test]
fn test_subdirs_create_nested_units() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let top = write(root, "top.pro", "TEMPLATE = subdirs\nSUBDIRS = core app\n");
    let core = write(root, "core/core.pro", "TEMPLATE = lib\nSOURCES += core.cpp\n");
    write(root, "core/core.cpp", "");
    let app = write(root, "app/app.pro", "TEMPLATE = app\nSOURCES += main.cpp\n");
    write(root, "app/main.cpp", "");

    let project = load(&top);
    let units = project.pro_units();
    assert_eq!(units.len(), 3);

    let core_id = project.find_pro_file_for(&core).unwrap();
    let app_id = project.find_pro_file_for(&app).unwrap();
    assert_eq!(project.pro_unit(core_id).unwrap().project_type(), ProjectType::Library);
    assert_eq!(project.pro_unit(app_id).unwrap().project_type(), ProjectType::Application);
    assert_eq!(
        project.pro_unit(project.root()).unwrap().project_type(),
        ProjectType::SubDirs
    );
    assert_eq!(project.tree().parent(core_id), Some(project.root()));
    assert!(units.iter().all(|&id| !project.pro_unit(id).unwrap().parse_in_progress()));
}

#[test]
fn test_included_file_becomes_pri_unit() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(root, "app.pro", "SOURCES += main.cpp\ninclude(common/common.pri)\n");
    write(root, "main.cpp", "");
    let pri = write(root, "common/common.pri", "SOURCES += $$PWD/util.cpp\n");
    let util = write(root, "common/util.cpp", "");

    let project = load(&pro);
    let pri_id = project.find_unit_for_file(&pri).unwrap();
    assert!(project.pri_unit(pri_id).is_some());
    assert_eq!(project.owning_pro(pri_id), Some(project.root()));

    let under_pri: Vec<_> = project
        .tree()
        .descendants(pri_id)
        .into_iter()
        .filter_map(|id| project.tree().path(id).map(|p| p.to_path_buf()))
        .collect();
    assert!(under_pri.contains(&util));
}

#[test]
fn test_sub_project_loop_is_ignored() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let top = write(root, "top.pro", "TEMPLATE = subdirs\nSUBDIRS += sub\n");
    write(root, "sub/sub.pro", "TEMPLATE = subdirs\nSUBDIRS += ../top.pro\n");

    let project = load(&top);
    assert_eq!(project.pro_units().len(), 2);
}

#[test]
fn test_reevaluation_is_stable() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(root, "app.pro", "SOURCES += a.cpp b/c.cpp\nFORMS += b/d.ui\n");
    write(root, "a.cpp", "");
    write(root, "b/c.cpp", "");
    write(root, "b/d.ui", "<ui/>");

    let mut project = load(&pro);
    let before = project.tree().render(project.root());
    let ids_before = project.tree().descendants(project.root());

    let root_id = project.root();
    project.update(root_id).unwrap();
    project.wait_for_evaluations();
    assert_eq!(project.tree().render(project.root()), before);
    assert_eq!(project.tree().descendants(project.root()), ids_before);
}

#[test]
fn test_failed_evaluation_invalidates_and_recovers() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(root, "app.pro", "TEMPLATE = app\nSOURCES += main.cpp\n");
    let main = write(root, "main.cpp", "");

    let mut project = load(&pro);
    assert!(shows(&project, &main));

    fs::write(&pro, "TEMPLATE = app\n}\n").unwrap();
    let root_id = project.root();
    project.update(root_id).unwrap();
    project.wait_for_evaluations();
    let unit = project.pro_unit(root_id).unwrap();
    assert_eq!(unit.project_type(), ProjectType::Invalid);
    assert!(!unit.valid_parse());
    assert!(!unit.parse_in_progress());
    assert!(!shows(&project, &main));

    fs::write(&pro, "TEMPLATE = app\nSOURCES += main.cpp\n").unwrap();
    project.update(root_id).unwrap();
    project.wait_for_evaluations();
    let unit = project.pro_unit(root_id).unwrap();
    assert_eq!(unit.project_type(), ProjectType::Application);
    assert!(unit.valid_parse());
    assert!(shows(&project, &main));
}

#[test]
fn test_removed_sub_project_drops_its_unit() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let top = write(root, "top.pro", "TEMPLATE = subdirs\nSUBDIRS = one two\n");
    write(root, "one/one.pro", "SOURCES += x.cpp\n");
    write(root, "one/x.cpp", "");
    let two = write(root, "two/two.pro", "SOURCES += y.cpp\n");
    let y = write(root, "two/y.cpp", "");

    let mut project = load(&top);
    assert_eq!(project.pro_units().len(), 3);

    fs::write(&top, "TEMPLATE = subdirs\nSUBDIRS = one\n").unwrap();
    let root_id = project.root();
    project.update(root_id).unwrap();
    project.wait_for_evaluations();

    assert_eq!(project.pro_units().len(), 2);
    assert!(project.find_pro_file_for(&two).is_none());
    assert!(!shows(&project, &y));
}

#[derive(Default)]
struct Counter {
    type_changes: AtomicUsize,
    finished: AtomicUsize,
}

impl ProjectListener for Counter {
    fn project_type_changed(&self, _unit: NodeId, _old: ProjectType, _new: ProjectType) {
        self.type_changes.fetch_add(1, Ordering::SeqCst);
    }

    fn pro_file_updated(&self, _unit: NodeId, _valid: bool, in_progress: bool) {
        if !in_progress {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_listeners_see_type_change() {
    let dir = TempDir::new().unwrap();
    let pro = write(dir.path(), "app.pro", "TEMPLATE = app\n");

    let mut project = load(&pro);
    let counter = Arc::new(Counter::default());
    project.subscribe(counter.clone());

    fs::write(&pro, "TEMPLATE = lib\n").unwrap();
    let root_id = project.root();
    project.update(root_id).unwrap();
    project.wait_for_evaluations();

    assert_eq!(counter.type_changes.load(Ordering::SeqCst), 1);
    assert!(counter.finished.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        project.pro_unit(root_id).unwrap().project_type(),
        ProjectType::Library
    );
}

#[test]
fn test_cancel_leaves_scheduled_units_invalid() {
    let dir = TempDir::new().unwrap();
    let pro = write(dir.path(), "app.pro", "SOURCES += main.cpp\n");
    write(dir.path(), "main.cpp", "");

    let mut project = load(&pro);
    let root_id = project.root();
    project.schedule_update(root_id).unwrap();
    assert_eq!(project.pending_evaluations(), 1);

    project.cancel_evaluations();
    let unit = project.pro_unit(root_id).unwrap();
    assert!(!unit.valid_parse());
    assert!(!unit.parse_in_progress());
    assert_eq!(project.pending_evaluations(), 0);
    assert!(!node_paths(&project).is_empty());
}

#[test]
fn test_deployed_folder_follows_disk() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(
        root,
        "app.pro",
        "TEMPLATE = app\nSOURCES += main.cpp\nqml.files = qml\nqml.path = /opt/app/qml\nINSTALLS += qml\n",
    );
    write(root, "main.cpp", "");
    let main_qml = write(root, "qml/main.qml", "Item {}\n");

    let mut project = load(&pro);
    assert!(shows(&project, &main_qml));
    let qml_dir = root.join("qml");
    assert_eq!(project.watched_folders(), vec![qml_dir.clone()]);

    let extra = write(root, "qml/pages/Extra.qml", "Item {}\n");
    assert_eq!(project.folder_changed(&qml_dir), 1);
    assert!(shows(&project, &extra));

    // Nothing new on disk: no-op.
    assert_eq!(project.folder_changed(&qml_dir), 0);

    fs::remove_file(&main_qml).unwrap();
    assert_eq!(project.folder_changed(&qml_dir), 1);
    assert!(!shows(&project, &main_qml));
    assert!(shows(&project, &extra));
}

#[test]
fn test_ui_headers_for_forms() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(root, "app.pro", "TEMPLATE = app\nFORMS += dialog.ui\n");
    write(root, "dialog.ui", "<ui version=\"4.0\"/>");

    let project = load(&pro);
    let unit = project.pro_unit(project.root()).unwrap();
    let headers: Vec<_> = unit.ui_files().values().cloned().collect();
    assert_eq!(headers, vec![root.join("ui_dialog.h")]);
}

/// Evaluates with the stock reader after an adjustable delay per reader.
#[derive(Default)]
struct SlowFactory {
    delay_ms: std::sync::atomic::AtomicU64,
    started: std::sync::atomic::AtomicBool,
}

impl ReaderFactory for SlowFactory {
    fn create(
        &self,
        mode: qmaketree::evaluation::ReaderMode,
        request: &qmaketree::evaluation::EvalRequest,
    ) -> Box<dyn qmaketree::evaluation::EvaluationReader> {
        self.started.store(true, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(delay));
        let stock = qmaketree::evaluation::QmakeReaderFactory::new(&Default::default());
        stock.create(mode, request)
    }
}

#[test]
fn test_cancel_running_evaluation_invalidates_subtree() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let top = write(root, "top.pro", "TEMPLATE = subdirs\nSUBDIRS = core app\n");
    write(root, "core/core.pro", "TEMPLATE = lib\nSOURCES += core.cpp\n");
    write(root, "core/core.cpp", "");
    write(root, "app/app.pro", "TEMPLATE = app\nSOURCES += main.cpp\n");
    write(root, "app/main.cpp", "");

    let factory = Arc::new(SlowFactory::default());
    let mut project = qmaketree::ProjectBuilder::new(&top)
        .reader_factory(factory.clone())
        .build()
        .unwrap();
    let root_id = project.root();
    project.update(root_id).unwrap();
    let units = project.pro_units();
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|&id| project.pro_unit(id).unwrap().valid_parse()));

    factory.delay_ms.store(300, Ordering::SeqCst);
    factory.started.store(false, Ordering::SeqCst);
    project.schedule_update(root_id).unwrap();
    project.process_evaluations();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !factory.started.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(factory.started.load(Ordering::SeqCst));
    assert_eq!(project.pending_evaluations(), 1);

    project.cancel_evaluations();
    project.wait_for_evaluations();

    assert_eq!(project.pending_evaluations(), 0);
    for id in units {
        let unit = project.pro_unit(id).unwrap();
        assert!(!unit.valid_parse(), "{} still valid", unit.file().display());
        assert!(!unit.parse_in_progress(), "{} still in progress", unit.file().display());
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Added(std::path::PathBuf),
    Variables(NodeId),
    Updated(NodeId, bool, bool),
}

#[derive(Default)]
struct Recorder {
    seen: parking_lot::Mutex<Vec<Seen>>,
}

impl ProjectListener for Recorder {
    fn variables_changed(
        &self,
        unit: NodeId,
        _old: &qmaketree::project::VariableTable,
        _new: &qmaketree::project::VariableTable,
    ) {
        self.seen.lock().push(Seen::Variables(unit));
    }

    fn pro_file_updated(&self, unit: NodeId, valid: bool, in_progress: bool) {
        self.seen.lock().push(Seen::Updated(unit, valid, in_progress));
    }
}

impl qmaketree::TreeObserver for Recorder {
    fn nodes_added(&self, tree: &qmaketree::NodeTree, _parent: NodeId, nodes: &[NodeId]) {
        let mut seen = self.seen.lock();
        for &node in nodes {
            for id in std::iter::once(node).chain(tree.descendants(node)) {
                if let Some(path) = tree.path(id) {
                    seen.push(Seen::Added(path.to_path_buf()));
                }
            }
        }
    }
}

#[test]
fn test_finished_notification_follows_applied_state() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let pro = write(root, "app.pro", "TEMPLATE = app\nSOURCES += main.cpp\n");
    write(root, "main.cpp", "");
    let extra = write(root, "extra.cpp", "");

    let mut project = load(&pro);
    let recorder = Arc::new(Recorder::default());
    project.subscribe(recorder.clone());
    project.add_tree_observer(recorder.clone());

    fs::write(&pro, "TEMPLATE = app\nSOURCES += main.cpp extra.cpp\n").unwrap();
    let root_id = project.root();
    project.schedule_update(root_id).unwrap();
    project.wait_for_evaluations();

    let seen = recorder.seen.lock().clone();
    let finished = seen
        .iter()
        .rposition(|event| *event == Seen::Updated(root_id, true, false))
        .expect("finished notification");
    let added = seen
        .iter()
        .position(|event| *event == Seen::Added(extra.clone()))
        .expect("extra.cpp added");
    let variables = seen
        .iter()
        .position(|event| *event == Seen::Variables(root_id))
        .expect("variables changed");
    assert!(added < finished, "{seen:?}");
    assert!(variables < finished, "{seen:?}");
    assert!(
        seen[finished + 1..]
            .iter()
            .all(|event| !matches!(event, Seen::Added(_) | Seen::Variables(_))),
        "{seen:?}"
    );
}

#[test]
fn test_async_update_of_nested_subdirs() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let top = write(root, "top.pro", "TEMPLATE = subdirs\nSUBDIRS = core apps\n");
    let core = write(root, "core/core.pro", "TEMPLATE = lib\nSOURCES += core.cpp\n");
    write(root, "core/core.cpp", "");
    let apps = write(root, "apps/apps.pro", "TEMPLATE = subdirs\nSUBDIRS = one two\n");
    let one = write(root, "apps/one/one.pro", "TEMPLATE = app\nSOURCES += main.cpp\n");
    write(root, "apps/one/main.cpp", "");
    let two = write(root, "apps/two/two.pro", "TEMPLATE = app\nSOURCES += main.cpp\n");
    write(root, "apps/two/main.cpp", "");

    let mut project = load(&top);
    assert_eq!(project.pro_units().len(), 5);
    let one_id = project.find_pro_file_for(&one).unwrap();
    let apps_id = project.find_pro_file_for(&apps).unwrap();
    let root_id = project.root();

    fs::write(&one, "TEMPLATE = lib\nSOURCES += main.cpp\n").unwrap();

    // Queued descendants collapse into the ancestor that covers them.
    project.schedule_update(one_id).unwrap();
    project.schedule_update(apps_id).unwrap();
    assert_eq!(project.pending_evaluations(), 1);
    project.schedule_update(root_id).unwrap();
    project.schedule_update(one_id).unwrap();
    assert_eq!(project.pending_evaluations(), 1);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while project.pending_evaluations() > 0 && std::time::Instant::now() < deadline {
        project.process_evaluations();
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(project.pending_evaluations(), 0);

    let units = project.pro_units();
    assert_eq!(units.len(), 5);
    for id in units {
        let unit = project.pro_unit(id).unwrap();
        assert!(unit.valid_parse(), "{} not evaluated", unit.file().display());
        assert!(!unit.parse_in_progress(), "{} still in progress", unit.file().display());
    }
    let type_of = |path: &std::path::Path| {
        let id = project.find_pro_file_for(path).unwrap();
        project.pro_unit(id).unwrap().project_type()
    };
    assert_eq!(type_of(&one), ProjectType::Library);
    assert_eq!(type_of(&two), ProjectType::Application);
    assert_eq!(type_of(&core), ProjectType::Library);
    assert_eq!(type_of(&apps), ProjectType::SubDirs);
}

//! Produces type information for QML modules that ship native plugins.
//!
//! A module either lists `.qmltypes` files, which are parsed directly, or
//! its plugins are loaded by a helper program that prints the type
//! description on stdout. Helpers run on their own threads; their output
//! is applied on the owning thread by [`PluginDumper::poll`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};

use super::error::{DumpError, dump_error_message, dump_failed_message, no_type_info_message};
use super::library_info::{LibraryInfo, TypeDescriptionParser, TypeInfoStatus};
use crate::config::PluginConfig;
use crate::paths::{absolute_from, clean_path};

/// One QML module with native plugins, identified by its directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plugin {
    pub qmldir_path: PathBuf,
    pub import_path: String,
    pub import_uri: String,
    pub import_version: String,
    pub type_info_paths: Vec<PathBuf>,
}

/// How a helper run ended.
#[derive(Debug)]
enum HelperExit {
    Finished(Output),
    FailedToStart(String),
    TimedOut,
}

/// What a finished helper run left behind.
#[derive(Debug)]
struct DumpOutput {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    exit: HelperExit,
}

const HELPER_POLL: Duration = Duration::from_millis(20);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

/// Run `program` to completion, killing it once `timeout` passes.
///
/// Both pipes are drained on their own threads so a chatty helper cannot
/// block on a full pipe while it is being waited for.
fn run_helper(program: &Path, args: &[String], timeout: Duration) -> HelperExit {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return HelperExit::FailedToStart(e.to_string()),
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return HelperExit::Finished(Output {
                    status,
                    stdout: collect(stdout),
                    stderr: collect(stderr),
                });
            }
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                // Readers finish on their own once the pipes close.
                return HelperExit::TimedOut;
            }
            Ok(None) => std::thread::sleep(HELPER_POLL),
            Err(e) => {
                let _ = child.kill();
                return HelperExit::FailedToStart(e.to_string());
            }
        }
    }
}

struct RunningDump {
    library: PathBuf,
    rx: Receiver<DumpOutput>,
}

pub struct PluginDumper {
    config: PluginConfig,
    parser: Arc<dyn TypeDescriptionParser>,
    plugins: Vec<Plugin>,
    library_to_plugin: HashMap<PathBuf, usize>,
    libraries: HashMap<PathBuf, LibraryInfo>,
    running: Vec<RunningDump>,
    /// Plugin libraries and type-info files, with the modification time
    /// last seen.
    watched: HashMap<PathBuf, Option<SystemTime>>,
    /// Helper used for each builtins directory, to notice a changed helper.
    builtins: HashMap<PathBuf, PathBuf>,
}

impl std::fmt::Debug for PluginDumper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDumper")
            .field("plugins", &self.plugins.len())
            .field("libraries", &self.libraries.len())
            .field("running", &self.running.len())
            .finish()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// `major.minor`, both numeric.
fn is_valid_version(version: &str) -> bool {
    version
        .split_once('.')
        .is_some_and(|(major, minor)| major.parse::<u32>().is_ok() && minor.parse::<u32>().is_ok())
}

/// Locate the shared library a `plugin` line of a qmldir refers to.
pub fn resolve_plugin(qmldir_dir: &Path, plugin_path: &str, base_name: &str) -> Option<PathBuf> {
    let (prefix, suffixes): (&str, &[&str]) = if cfg!(windows) {
        ("", &["d.dll", ".dll"])
    } else if cfg!(target_os = "macos") {
        ("lib", &["_debug.dylib", ".dylib", ".so", ".bundle"])
    } else {
        ("lib", &[".so"])
    };

    let mut search = Vec::new();
    let relative = Path::new(plugin_path).is_relative();
    if !relative {
        search.push(PathBuf::from(plugin_path));
    }
    search.push(if relative {
        absolute_from(qmldir_dir, Path::new(plugin_path))
    } else {
        qmldir_dir.to_path_buf()
    });

    search.into_iter().find_map(|dir| {
        suffixes
            .iter()
            .map(|suffix| dir.join(format!("{prefix}{base_name}{suffix}")))
            .find(|candidate| candidate.exists())
    })
}

impl PluginDumper {
    pub fn new(config: &PluginConfig, parser: Arc<dyn TypeDescriptionParser>) -> Self {
        Self {
            config: config.clone(),
            parser,
            plugins: Vec::new(),
            library_to_plugin: HashMap::new(),
            libraries: HashMap::new(),
            running: Vec::new(),
            watched: HashMap::new(),
            builtins: HashMap::new(),
        }
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn library_info(&self, path: &Path) -> Option<&LibraryInfo> {
        self.libraries.get(&clean_path(path))
    }

    pub fn update_library_info(&mut self, path: &Path, info: LibraryInfo) {
        self.libraries.insert(clean_path(path), info);
    }

    pub fn is_dumping(&self, library: &Path) -> bool {
        let library = clean_path(library);
        self.running.iter().any(|r| r.library == library)
    }

    pub fn running_dumps(&self) -> usize {
        self.running.len()
    }

    fn library_entry(&mut self, library: &Path) -> &mut LibraryInfo {
        self.libraries
            .entry(library.to_path_buf())
            .or_insert_with(|| LibraryInfo::read(library))
    }

    fn watch_file(&mut self, path: PathBuf, index: usize) {
        self.watched.entry(path.clone()).or_insert_with(|| modified(&path));
        self.library_to_plugin.insert(path, index);
    }

    /// Register the module in `library_path` and produce its type
    /// information. Modules already dumped or being dumped are left alone.
    pub fn load_plugin_types(
        &mut self,
        library_path: &Path,
        import_path: &str,
        import_uri: &str,
        import_version: &str,
    ) {
        let library = clean_path(library_path);
        if self.is_dumping(&library) {
            return;
        }
        let info = self.library_entry(&library).clone();
        if info.status != TypeInfoStatus::NotDumped {
            return;
        }

        let index = match self.plugins.iter().position(|p| p.qmldir_path == library) {
            Some(index) => index,
            None => {
                self.plugins.push(Plugin::default());
                self.plugins.len() - 1
            }
        };

        let mut type_info_paths = Vec::new();
        let default_types = library.join("plugins.qmltypes");
        if default_types.exists() {
            type_info_paths.push(default_types);
        }
        type_info_paths.extend(info.type_info_paths(&library));

        for plugin in &info.qmldir.plugins {
            if let Some(native) = resolve_plugin(&library, &plugin.path, &plugin.name) {
                self.watch_file(native, index);
            }
        }
        for path in type_info_paths.iter().filter(|p| p.exists()) {
            self.watch_file(path.clone(), index);
        }

        self.plugins[index] = Plugin {
            qmldir_path: library,
            import_path: import_path.to_string(),
            import_uri: import_uri.to_string(),
            import_version: import_version.to_string(),
            type_info_paths,
        };
        self.dump(index);
    }

    /// Load the types built into QML itself from `qt_imports_path`,
    /// preferring a shipped `builtins.qmltypes` over running the helper.
    pub fn load_builtin_types(&mut self, qt_imports_path: &Path, force: bool) {
        let Some(helper) = self.config.qmldump_path.clone() else {
            return;
        };
        let imports = clean_path(qt_imports_path);
        if self.is_dumping(&imports) {
            return;
        }
        if !force && self.libraries.get(&imports).is_some_and(|info| info.valid) {
            return;
        }
        let info = LibraryInfo::with_status(TypeInfoStatus::Found);
        self.libraries.insert(imports.clone(), info);

        for candidate in ["builtins.qmltypes", "QtQuick1/builtins.qmltypes"] {
            let path = imports.join(candidate);
            if path.exists() {
                self.load_type_info_files(&[path], &imports);
                return;
            }
        }

        self.builtins.insert(imports.clone(), helper.clone());
        self.start_helper(&imports, &helper, vec!["--builtins".to_string()]);
    }

    /// Re-run builtins loading when the configured helper changed since the
    /// last run for `qt_imports_path`.
    pub fn redump_builtins_if_changed(&mut self, qt_imports_path: &Path) {
        let imports = clean_path(qt_imports_path);
        let previous = self.builtins.get(&imports).cloned();
        if previous.is_some() && previous != self.config.qmldump_path {
            self.builtins.remove(&imports);
            self.load_builtin_types(&imports, true);
        }
    }

    pub fn set_config(&mut self, config: &PluginConfig) {
        self.config = config.clone();
    }

    pub fn dump_all_plugins(&mut self) {
        for index in 0..self.plugins.len() {
            self.dump(index);
        }
    }

    /// A watched plugin library or type-info file changed on disk.
    pub fn plugin_changed(&mut self, path: &Path) {
        if let Some(&index) = self.library_to_plugin.get(&clean_path(path)) {
            crate::debug_event!("plugins", "changed", "{}", path.display());
            self.dump(index);
        }
    }

    /// Compare modification times of watched files; re-dump changed ones.
    pub fn check_plugin_files(&mut self) -> usize {
        let mut changed = Vec::new();
        for (path, seen) in self.watched.iter_mut() {
            let now = modified(path);
            if now != *seen {
                *seen = now;
                changed.push(path.clone());
            }
        }
        for path in &changed {
            self.plugin_changed(path);
        }
        changed.len()
    }

    fn dump(&mut self, index: usize) {
        let Some(plugin) = self.plugins.get(index).cloned() else {
            return;
        };
        let library = plugin.qmldir_path.clone();

        if !plugin.type_info_paths.is_empty() {
            if self.library_entry(&library).valid {
                self.load_type_info_files(&plugin.type_info_paths, &library);
            }
            return;
        }

        let helper = self.config.qmldump_path.clone().filter(|_| self.config.try_qml_dump);
        let Some(helper) = helper else {
            let message = if self.config.try_qml_dump {
                dump_error_message(&library, &DumpError::NoHelper.to_string())
            } else {
                no_type_info_message(&library)
            };
            let info = self.library_entry(&library);
            if info.valid {
                info.set_status(TypeInfoStatus::DumpError, Some(message));
            }
            return;
        };

        let mut args = Vec::new();
        if plugin.import_uri.is_empty() {
            args.push("--path".to_string());
            args.push(plugin.import_path.clone());
            if is_valid_version(&plugin.import_version) {
                args.push(plugin.import_version.clone());
            }
        } else {
            if self.config.relocatable {
                args.push("-relocatable".to_string());
            }
            args.push(plugin.import_uri.clone());
            args.push(plugin.import_version.clone());
            args.push(plugin.import_path.clone());
        }
        self.start_helper(&library, &helper, args);
    }

    fn start_helper(&mut self, library: &Path, helper: &Path, args: Vec<String>) {
        let (tx, rx) = bounded(1);
        let program = helper.display().to_string();
        let command_program = helper.to_path_buf();
        let timeout = Duration::from_secs(self.config.dump_timeout_secs);
        crate::debug_event!("plugins", "dumping", "{} {}", program, args.join(" "));

        std::thread::spawn(move || {
            let exit = run_helper(&command_program, &args, timeout);
            let _ = tx.send(DumpOutput {
                program,
                args,
                timeout,
                exit,
            });
        });
        self.running.push(RunningDump {
            library: library.to_path_buf(),
            rx,
        });
    }

    /// Parse every file in `paths` into the entry for `library`.
    fn load_type_info_files(&mut self, paths: &[PathBuf], library: &Path) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut objects = Vec::new();
        let mut module_apis = Vec::new();

        for path in paths {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    errors.push(
                        DumpError::ReadFailed {
                            path: path.clone(),
                            reason: e.to_string(),
                        }
                        .to_string(),
                    );
                    continue;
                }
            };
            let parsed = self.parser.parse(&text, &path.display().to_string());
            match parsed.error {
                Some(message) => errors.push(
                    DumpError::TypeInfo {
                        path: path.display().to_string(),
                        message,
                    }
                    .to_string(),
                ),
                None => {
                    objects.extend(parsed.objects);
                    module_apis.extend(parsed.module_apis);
                }
            }
            warnings.extend(parsed.warning);
        }

        if !warnings.is_empty() {
            tracing::warn!(
                target: "plugins",
                "warnings while parsing qmltypes information of {}:\n{}",
                library.display(),
                warnings.join("\n")
            );
        }

        let info = self.library_entry(library);
        info.objects = objects;
        info.module_apis = module_apis;
        if errors.is_empty() {
            info.set_status(TypeInfoStatus::TypeInfoFileDone, None);
        } else {
            errors.insert(0, "Errors while reading typeinfo files:".to_string());
            info.set_status(TypeInfoStatus::TypeInfoFileError, Some(errors.join("\n")));
        }
    }

    fn apply_output(&mut self, library: &Path, output: DumpOutput) {
        let described = format!("{}\nArguments: {}", output.program, output.args.join(" "));
        let result = match output.exit {
            HelperExit::FailedToStart(reason) => Err(DumpError::FailedToStart {
                program: output.program.clone(),
                reason,
            }
            .to_string()
                + &format!("\nArguments: {}", output.args.join(" "))),
            HelperExit::TimedOut => Err(format!(
                "{}\nArguments: {}",
                DumpError::TimedOut {
                    program: output.program.clone(),
                    seconds: output.timeout.as_secs(),
                },
                output.args.join(" ")
            )),
            HelperExit::Finished(process) => match process.status.code() {
                None => Err(format!(
                    "{}\n{}",
                    DumpError::Crashed {
                        program: output.program.clone()
                    },
                    String::from_utf8_lossy(&process.stderr)
                )),
                Some(0) => Ok(process.stdout),
                Some(code) => Err(format!(
                    "{}\n{}\n{}",
                    DumpError::ExitCode {
                        program: output.program.clone(),
                        code
                    },
                    described,
                    String::from_utf8_lossy(&process.stderr)
                )),
            },
        };

        match result {
            Err(errors) => {
                tracing::warn!(target: "plugins", "{}", dump_error_message(library, &errors));
                self.library_entry(library).set_status(
                    TypeInfoStatus::DumpError,
                    Some(dump_failed_message(library, &errors)),
                );
            }
            Ok(stdout) => {
                let source = String::from_utf8_lossy(&stdout);
                let parsed = self
                    .parser
                    .parse(&source, &format!("<dump of {}>", library.display()));
                if let Some(warning) = &parsed.warning {
                    tracing::warn!(target: "plugins", "{warning}");
                }
                let info = self.library_entry(library);
                match parsed.error {
                    Some(error) => info.set_status(
                        TypeInfoStatus::DumpError,
                        Some(dump_error_message(library, &error)),
                    ),
                    None => {
                        info.objects = parsed.objects;
                        info.module_apis = parsed.module_apis;
                        info.set_status(TypeInfoStatus::DumpDone, None);
                    }
                }
            }
        }
        crate::debug_event!("plugins", "dump finished", "{}", library.display());
    }

    /// Apply every helper run that has finished. Returns how many.
    pub fn poll(&mut self) -> usize {
        let mut finished = Vec::new();
        self.running.retain(|run| match run.rx.try_recv() {
            Ok(output) => {
                finished.push((run.library.clone(), output));
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => false,
        });
        let count = finished.len();
        for (library, output) in finished {
            self.apply_output(&library, output);
        }
        count
    }

    /// Block until every helper run has finished or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> usize {
        let deadline = std::time::Instant::now() + timeout;
        let mut applied = 0;
        while let Some(run) = self.running.first() {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            match run.rx.recv_timeout(left) {
                Ok(output) => {
                    let run = self.running.remove(0);
                    self.apply_output(&run.library, output);
                    applied += 1;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.running.remove(0);
                }
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
        applied
    }
}

//! Build information extracted from an exact evaluation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::evaluation::EvaluationReader;
use crate::paths::{absolute_from, base_name, clean_path};
use crate::types::ProjectType;

/// The recognized variables kept per `.pro` unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Variable {
    Defines,
    IncludePath,
    CxxFlags,
    Headers,
    Sources,
    ObjCSources,
    ObjCHeaders,
    Resources,
    /// Resources from the exact pass only.
    ExactResources,
    UiDir,
    MocDir,
    PkgConfig,
    PrecompiledHeader,
    LibDirectories,
    Config,
    Qt,
    QmlImportPath,
    Makefile,
    ObjectExt,
    ObjectsDir,
    Version,
    TargetExt,
    TargetVersionExt,
    StaticLibExtension,
    SharedLibExtension,
    AndroidArch,
    AndroidDeploySettingsFile,
    AndroidPackageSourceDir,
    AndroidExtraLibs,
}

impl Variable {
    pub const ALL: [Variable; 29] = [
        Variable::Defines,
        Variable::IncludePath,
        Variable::CxxFlags,
        Variable::Headers,
        Variable::Sources,
        Variable::ObjCSources,
        Variable::ObjCHeaders,
        Variable::Resources,
        Variable::ExactResources,
        Variable::UiDir,
        Variable::MocDir,
        Variable::PkgConfig,
        Variable::PrecompiledHeader,
        Variable::LibDirectories,
        Variable::Config,
        Variable::Qt,
        Variable::QmlImportPath,
        Variable::Makefile,
        Variable::ObjectExt,
        Variable::ObjectsDir,
        Variable::Version,
        Variable::TargetExt,
        Variable::TargetVersionExt,
        Variable::StaticLibExtension,
        Variable::SharedLibExtension,
        Variable::AndroidArch,
        Variable::AndroidDeploySettingsFile,
        Variable::AndroidPackageSourceDir,
        Variable::AndroidExtraLibs,
    ];

    /// The qmake variable a plain copy reads from, if any.
    fn source_name(self) -> Option<&'static str> {
        Some(match self {
            Variable::Defines => "DEFINES",
            Variable::CxxFlags => "QMAKE_CXXFLAGS",
            Variable::PkgConfig => "PKGCONFIG",
            Variable::Config => "CONFIG",
            Variable::Qt => "QT",
            Variable::Makefile => "MAKEFILE",
            Variable::ObjectExt => "QMAKE_EXT_OBJ",
            Variable::ObjectsDir => "OBJECTS_DIR",
            Variable::Version => "VERSION",
            Variable::TargetExt => "TARGET_EXT",
            Variable::TargetVersionExt => "TARGET_VERSION_EXT",
            Variable::StaticLibExtension => "QMAKE_EXTENSION_STATICLIB",
            Variable::SharedLibExtension => "QMAKE_EXTENSION_SHLIB",
            Variable::AndroidArch => "ANDROID_TARGET_ARCH",
            Variable::AndroidDeploySettingsFile => "ANDROID_DEPLOYMENT_SETTINGS_FILE",
            Variable::AndroidPackageSourceDir => "ANDROID_PACKAGE_SOURCE_DIR",
            Variable::AndroidExtraLibs => "ANDROID_EXTRA_LIBS",
            _ => return None,
        })
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type VariableTable = BTreeMap<Variable, Vec<String>>;

/// Where the build puts the primary target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetInformation {
    pub valid: bool,
    pub target: String,
    pub destdir: PathBuf,
    pub build_dir: PathBuf,
}

impl TargetInformation {
    pub fn from_reader(reader: &dyn EvaluationReader, pro_file: &Path, build_dir: &Path) -> Self {
        let target = match reader.value("TARGET") {
            t if t.is_empty() => base_name(pro_file),
            t => t,
        };
        let destdir = match reader.value("DESTDIR") {
            d if d.is_empty() => build_dir.to_path_buf(),
            d => absolute_from(build_dir, Path::new(&d)),
        };
        Self {
            valid: true,
            target,
            destdir,
            build_dir: build_dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallsItem {
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// `INSTALLS` entries taking part in a default `make install`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallsList {
    pub target_path: Option<PathBuf>,
    pub items: Vec<InstallsItem>,
}

impl InstallsList {
    pub fn from_reader(reader: &dyn EvaluationReader, project_dir: &Path) -> Self {
        let mut list = InstallsList::default();
        let search = [project_dir.to_path_buf()];
        for item in reader.values("INSTALLS") {
            if reader
                .values(&format!("{item}.CONFIG"))
                .iter()
                .any(|c| c == "no_default_install")
            {
                continue;
            }
            // Only the last path counts.
            let Some(path) = reader.values(&format!("{item}.path")).pop() else {
                tracing::debug!(target: "project", "INSTALLS item '{item}' has no .path");
                continue;
            };
            let path = clean_path(Path::new(&path));
            if item == "target" {
                list.target_path = Some(path);
                continue;
            }
            let files =
                reader.absolute_file_values(&format!("{item}.files"), project_dir, &search, None);
            if !files.is_empty() {
                list.items.push(InstallsItem { path, files });
            }
        }
        list
    }
}

/// `VPATH` plus the project and build dirs, deduplicated in order.
pub fn base_vpaths(reader: &dyn EvaluationReader, project_dir: &Path, build_dir: &Path) -> Vec<PathBuf> {
    let mut paths = reader.absolute_path_values("VPATH", project_dir);
    paths.push(project_dir.to_path_buf());
    paths.push(build_dir.to_path_buf());
    dedup_in_order(&mut paths);
    paths
}

/// Search dirs for one variable: `VPATH_<var>` first, then the base list.
pub fn full_vpaths(
    base: &[PathBuf],
    reader: &dyn EvaluationReader,
    variable: &str,
    project_dir: &Path,
) -> Vec<PathBuf> {
    let mut paths = reader.absolute_path_values(&format!("VPATH_{variable}"), project_dir);
    paths.extend(base.iter().cloned());
    dedup_in_order(&mut paths);
    paths
}

/// Build inputs shared by the whole variable table.
pub struct ExtractionInput<'a> {
    pub exact: &'a dyn EvaluationReader,
    pub cumulative: &'a dyn EvaluationReader,
    pub project_dir: &'a Path,
    pub build_dir: &'a Path,
}

impl ExtractionInput<'_> {
    /// Exact and cumulative values of a file variable, resolved through VPATH.
    fn file_list(&self, variable: &str) -> Vec<String> {
        let mut files = Vec::new();
        for reader in [self.exact, self.cumulative] {
            let base = base_vpaths(reader, self.project_dir, self.build_dir);
            let search = full_vpaths(&base, reader, variable, self.project_dir);
            files.extend(reader.absolute_file_values(variable, self.project_dir, &search, None));
        }
        dedup_in_order(&mut files);
        to_strings(&files)
    }

    fn build_relative_dir(&self, variable: &str) -> PathBuf {
        match self.exact.value(variable) {
            v if v.is_empty() => self.build_dir.to_path_buf(),
            v => absolute_from(self.build_dir, Path::new(&v)),
        }
    }

    pub fn ui_dir(&self) -> PathBuf {
        self.build_relative_dir("UI_DIR")
    }

    pub fn moc_dir(&self) -> PathBuf {
        self.build_relative_dir("MOC_DIR")
    }

    fn include_paths(&self) -> Vec<String> {
        let exact = self.exact;
        let mut paths: Vec<PathBuf> = exact
            .values("QMAKE_CXXFLAGS")
            .iter()
            .filter_map(|flag| flag.strip_prefix("-I"))
            .map(PathBuf::from)
            .collect();
        paths.extend(exact.absolute_path_values("INCLUDEPATH", self.project_dir));
        paths.extend(exact.absolute_path_values("QMAKE_INCDIR", self.project_dir));
        paths.push(self.moc_dir());
        paths.push(self.ui_dir());
        paths.push(self.project_dir.to_path_buf());
        dedup_in_order(&mut paths);
        to_strings(&paths)
    }

    fn lib_directories(&self) -> Vec<String> {
        self.exact
            .values("LIBS")
            .iter()
            .filter_map(|lib| lib.strip_prefix("-L"))
            .map(str::to_string)
            .collect()
    }

    /// Populate every recognized variable.
    pub fn extract(&self) -> VariableTable {
        let search = [self.project_dir.to_path_buf()];
        let mut table = VariableTable::new();
        for variable in Variable::ALL {
            let values = match variable {
                Variable::IncludePath => self.include_paths(),
                Variable::Headers => self.file_list("HEADERS"),
                Variable::Sources => self.file_list("SOURCES"),
                Variable::ObjCSources => self.file_list("OBJECTIVE_SOURCES"),
                Variable::ObjCHeaders => self.file_list("OBJECTIVE_HEADERS"),
                Variable::Resources => self.file_list("RESOURCES"),
                Variable::ExactResources => {
                    let base = base_vpaths(self.exact, self.project_dir, self.build_dir);
                    let dirs = full_vpaths(&base, self.exact, "RESOURCES", self.project_dir);
                    to_strings(&self.exact.absolute_file_values(
                        "RESOURCES",
                        self.project_dir,
                        &dirs,
                        None,
                    ))
                }
                Variable::UiDir => to_strings(&[self.ui_dir()]),
                Variable::MocDir => to_strings(&[self.moc_dir()]),
                Variable::PrecompiledHeader => to_strings(&self.exact.absolute_file_values(
                    "PRECOMPILED_HEADER",
                    self.project_dir,
                    &search,
                    None,
                )),
                Variable::LibDirectories => self.lib_directories(),
                Variable::QmlImportPath => {
                    to_strings(&self.exact.absolute_path_values("QML_IMPORT_PATH", self.project_dir))
                }
                other => other
                    .source_name()
                    .map(|name| self.exact.values(name))
                    .unwrap_or_default(),
            };
            table.insert(variable, values);
        }
        table
    }
}

/// Applications always deploy; other units only when some `DEPLOYMENT`
/// item lists sources.
pub fn is_deployable(project_type: ProjectType, reader: &dyn EvaluationReader) -> bool {
    project_type == ProjectType::Application
        || reader
            .values("DEPLOYMENT")
            .iter()
            .any(|item| !reader.values(&format!("{item}.sources")).is_empty())
}

/// Remove later duplicates, keeping first-seen order.
pub fn dedup_in_order<T: Clone + Eq + std::hash::Hash>(items: &mut Vec<T>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

fn to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{EvaluationReader, LoadMode, ProFile, QmakeReader, ReaderContext, ReaderMode};
    use std::fs;
    use tempfile::TempDir;

    fn evaluate(mode: ReaderMode, pro: &Path, build_dir: &Path) -> QmakeReader {
        let mut reader = QmakeReader::new(
            mode,
            ReaderContext {
                platform_scopes: vec!["unix".into(), "linux".into()],
                config: vec!["debug".into()],
                build_dir: build_dir.to_path_buf(),
            },
        );
        let file = ProFile::parse(pro).unwrap();
        reader.accept(&file, LoadMode::All);
        reader
    }

    #[test]
    fn test_extract_resolves_files_through_vpath() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("shared")).unwrap();
        fs::write(root.join("main.cpp"), "").unwrap();
        fs::write(root.join("shared/util.cpp"), "").unwrap();
        fs::write(root.join("win.cpp"), "").unwrap();
        let pro = root.join("app.pro");
        fs::write(
            &pro,
            "VPATH += shared\nSOURCES += main.cpp util.cpp\nwin32: SOURCES += win.cpp\n\
             DEFINES += APP_VERSION=2 TRACE\nQMAKE_CXXFLAGS += -I/opt/inc\nLIBS += -L/opt/lib -lfoo\n",
        )
        .unwrap();

        let build = root.join("build");
        let exact = evaluate(ReaderMode::Exact, &pro, &build);
        let cumulative = evaluate(ReaderMode::Cumulative, &pro, &build);
        let input = ExtractionInput {
            exact: &exact,
            cumulative: &cumulative,
            project_dir: root,
            build_dir: &build,
        };
        let table = input.extract();

        let sources = &table[&Variable::Sources];
        assert_eq!(sources.len(), 3);
        assert!(sources.contains(&root.join("shared/util.cpp").to_string_lossy().into_owned()));
        assert!(sources.contains(&root.join("win.cpp").to_string_lossy().into_owned()));
        assert_eq!(table[&Variable::Defines], vec!["APP_VERSION=2", "TRACE"]);
        assert_eq!(table[&Variable::LibDirectories], vec!["/opt/lib"]);
        assert_eq!(table[&Variable::IncludePath][0], "/opt/inc");
        assert_eq!(table[&Variable::UiDir], vec![build.to_string_lossy().into_owned()]);
        assert_eq!(table.len(), Variable::ALL.len());
    }

    #[test]
    fn test_target_and_installs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("data.txt"), "").unwrap();
        let pro = root.join("tool.pro");
        fs::write(
            &pro,
            "DESTDIR = bin\ntarget.path = /usr/bin\ndata.files = data.txt\ndata.path = /usr/share\n\
             docs.files = missing.txt\ndocs.path = /usr/doc\nskip.path = /x\nskip.CONFIG = no_default_install\n\
             INSTALLS += target data docs skip\n",
        )
        .unwrap();
        let build = root.join("build");
        let exact = evaluate(ReaderMode::Exact, &pro, &build);

        let info = TargetInformation::from_reader(&exact, &pro, &build);
        assert_eq!(info.target, "tool");
        assert_eq!(info.destdir, build.join("bin"));

        let installs = InstallsList::from_reader(&exact, root);
        assert_eq!(installs.target_path, Some(PathBuf::from("/usr/bin")));
        assert_eq!(installs.items.len(), 1);
        assert_eq!(installs.items[0].files, vec![root.join("data.txt")]);
    }

    #[test]
    fn test_deployable() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.pro");
        fs::write(&lib, "TEMPLATE = lib\nDEPLOYMENT += extra\n").unwrap();
        let exact = evaluate(ReaderMode::Exact, &lib, dir.path());
        assert!(is_deployable(ProjectType::Application, &exact));
        assert!(!is_deployable(ProjectType::Library, &exact));

        fs::write(&lib, "TEMPLATE = lib\nDEPLOYMENT += extra\nextra.sources = a.so\n").unwrap();
        let exact = evaluate(ReaderMode::Exact, &lib, dir.path());
        assert!(is_deployable(ProjectType::Library, &exact));
    }
}

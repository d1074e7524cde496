use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn value(&self) -> u32 {
        self.0.get()
    }

    /// Zero-based slot in the node arena.
    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical file category shown in the project tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileType {
    Header,
    Source,
    Form,
    Resource,
    Qml,
    Unknown,
    /// The `.pro`/`.pri` file itself.
    Project,
}

/// Display data for one classified file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTypeData {
    pub file_type: FileType,
    pub type_name: &'static str,
}

/// The six file types a build file classifies into, in display order.
///
/// The virtual folder for entry `i` gets priority `-i`.
pub const FILE_TYPE_TABLE: [FileTypeData; 6] = [
    FileTypeData { file_type: FileType::Header, type_name: "Headers" },
    FileTypeData { file_type: FileType::Source, type_name: "Sources" },
    FileTypeData { file_type: FileType::Form, type_name: "Forms" },
    FileTypeData { file_type: FileType::Resource, type_name: "Resources" },
    FileTypeData { file_type: FileType::Qml, type_name: "QML" },
    FileTypeData { file_type: FileType::Unknown, type_name: "Other files" },
];

impl FileType {
    /// Display name of the virtual folder grouping this type.
    pub fn type_name(self) -> &'static str {
        match self {
            FileType::Project => "Project files",
            other => FILE_TYPE_TABLE
                .iter()
                .find(|data| data.file_type == other)
                .map(|data| data.type_name)
                .unwrap_or("Other files"),
        }
    }

    /// Virtual folder priority, `-index` into [`FILE_TYPE_TABLE`].
    pub fn priority(self) -> i32 {
        FILE_TYPE_TABLE
            .iter()
            .position(|data| data.file_type == self)
            .map(|i| -(i as i32))
            .unwrap_or(i32::MIN)
    }

    /// qmake variables whose values are classified as this type.
    pub fn variables(self) -> &'static [&'static str] {
        match self {
            FileType::Header => &["HEADERS", "OBJECTIVE_HEADERS"],
            FileType::Source => &["SOURCES", "OBJECTIVE_SOURCES", "LEXSOURCES", "YACCSOURCES"],
            FileType::Resource => &["RESOURCES"],
            FileType::Form => &["FORMS"],
            FileType::Project => &["SUBDIRS"],
            FileType::Qml => &["OTHER_FILES"],
            FileType::Unknown => &["OTHER_FILES", "ICON"],
        }
    }
}

/// Every variable scanned when removing entries from a build file.
pub const VARIABLES_FOR_REMOVING: [&str; 9] = [
    "HEADERS",
    "OBJECTIVE_HEADERS",
    "SOURCES",
    "OBJECTIVE_SOURCES",
    "RESOURCES",
    "FORMS",
    "OTHER_FILES",
    "SUBDIRS",
    "ICON",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectType {
    Application,
    Library,
    Script,
    Aux,
    SubDirs,
    Invalid,
}

impl ProjectType {
    pub fn has_build_targets(self) -> bool {
        matches!(self, ProjectType::Application | ProjectType::Library)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProjectType::Application => "app",
            ProjectType::Library => "lib",
            ProjectType::Script => "script",
            ProjectType::Aux => "aux",
            ProjectType::SubDirs => "subdirs",
            ProjectType::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Content type of a file, finer grained than [`FileType`].
///
/// Used to pick the variable a new file is added under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MimeKind {
    CppHeader,
    CHeader,
    CppSource,
    CSource,
    ObjCppSource,
    Resource,
    Form,
    Qml,
    ProFile,
    Other,
}

impl MimeKind {
    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("h") => MimeKind::CHeader,
            Some("hpp" | "hh" | "hxx" | "h++") => MimeKind::CppHeader,
            Some("c") => MimeKind::CSource,
            Some("cpp" | "cc" | "cxx" | "c++" | "cp") => MimeKind::CppSource,
            Some("mm" | "m") => MimeKind::ObjCppSource,
            Some("qrc") => MimeKind::Resource,
            Some("ui") => MimeKind::Form,
            Some("qml") => MimeKind::Qml,
            Some("pro" | "pri" | "prf") => MimeKind::ProFile,
            _ => MimeKind::Other,
        }
    }

    pub fn file_type(self) -> FileType {
        match self {
            MimeKind::CppHeader | MimeKind::CHeader => FileType::Header,
            MimeKind::CppSource | MimeKind::CSource | MimeKind::ObjCppSource => FileType::Source,
            MimeKind::Resource => FileType::Resource,
            MimeKind::Form => FileType::Form,
            MimeKind::Qml => FileType::Qml,
            MimeKind::ProFile => FileType::Project,
            MimeKind::Other => FileType::Unknown,
        }
    }

    /// The single canonical variable used when adding a file of this kind.
    pub fn variable_for_adding(self) -> &'static str {
        match self {
            MimeKind::CppHeader | MimeKind::CHeader => "HEADERS",
            MimeKind::CppSource | MimeKind::CSource => "SOURCES",
            MimeKind::ObjCppSource => "OBJECTIVE_SOURCES",
            MimeKind::Resource => "RESOURCES",
            MimeKind::Form => "FORMS",
            MimeKind::Qml => "OTHER_FILES",
            MimeKind::ProFile => "SUBDIRS",
            MimeKind::Other => "OTHER_FILES",
        }
    }
}

/// Classify a path into its logical [`FileType`].
pub fn classify_path(path: &Path) -> FileType {
    MimeKind::from_path(path).file_type()
}

/// Whether a path names a QML document.
pub fn is_qml_path(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".qml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_creation() {
        assert!(NodeId::new(0).is_none());

        let id = NodeId::new(7).unwrap();
        assert_eq!(id.value(), 7);
        assert_eq!(id.index(), 6);
    }

    #[test]
    fn test_classify_path() {
        assert_eq!(classify_path(Path::new("/p/main.cpp")), FileType::Source);
        assert_eq!(classify_path(Path::new("/p/main.h")), FileType::Header);
        assert_eq!(classify_path(Path::new("/p/dialog.ui")), FileType::Form);
        assert_eq!(classify_path(Path::new("/p/app.qrc")), FileType::Resource);
        assert_eq!(classify_path(Path::new("/p/main.qml")), FileType::Qml);
        assert_eq!(classify_path(Path::new("/p/README")), FileType::Unknown);
        assert_eq!(classify_path(Path::new("/p/sub/sub.pro")), FileType::Project);
    }

    #[test]
    fn test_variable_for_adding() {
        assert_eq!(MimeKind::from_path(Path::new("a.hpp")).variable_for_adding(), "HEADERS");
        assert_eq!(MimeKind::from_path(Path::new("a.mm")).variable_for_adding(), "OBJECTIVE_SOURCES");
        assert_eq!(MimeKind::from_path(Path::new("a.pri")).variable_for_adding(), "SUBDIRS");
        assert_eq!(MimeKind::from_path(Path::new("a.txt")).variable_for_adding(), "OTHER_FILES");
    }

    #[test]
    fn test_file_type_table_priorities() {
        assert_eq!(FileType::Header.priority(), 0);
        assert_eq!(FileType::Unknown.priority(), -5);
        assert_eq!(FileType::Qml.type_name(), "QML");
    }

    #[test]
    fn test_qml_detection() {
        assert!(is_qml_path(Path::new("/a/b/Main.qml")));
        assert!(!is_qml_path(Path::new("/a/b/qml.js")));
    }
}

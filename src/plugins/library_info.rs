//! What is known about one QML module directory, and how type
//! descriptions are read.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Progress of a module's plugin type information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeInfoStatus {
    NotDumped,
    /// Registered; loading is under way.
    Found,
    DumpError,
    TypeInfoFileDone,
    TypeInfoFileError,
    DumpDone,
}

/// A `plugin <name> [<path>]` line of a `qmldir` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QmldirPlugin {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Qmldir {
    pub module: Option<String>,
    pub plugins: Vec<QmldirPlugin>,
    /// `typeinfo` file names, as written.
    pub type_infos: Vec<String>,
}

impl Qmldir {
    pub fn parse(text: &str) -> Self {
        let mut qmldir = Qmldir::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["module", uri] => qmldir.module = Some(uri.to_string()),
                ["plugin", name] => qmldir.plugins.push(QmldirPlugin {
                    name: name.to_string(),
                    path: String::new(),
                }),
                ["plugin", name, path] => qmldir.plugins.push(QmldirPlugin {
                    name: name.to_string(),
                    path: path.to_string(),
                }),
                ["typeinfo", file] => qmldir.type_infos.push(file.to_string()),
                _ => {}
            }
        }
        qmldir
    }
}

/// One exported C++ type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDescription {
    pub name: String,
    pub prototype: Option<String>,
    pub exports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleApi {
    pub uri: String,
    pub version: String,
}

/// Result of parsing one type-description document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTypes {
    pub objects: Vec<TypeDescription>,
    pub module_apis: Vec<ModuleApi>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

/// Reads `.qmltypes` documents, whether from a file or helper output.
pub trait TypeDescriptionParser: Send + Sync {
    fn parse(&self, source: &str, file_name: &str) -> ParsedTypes;
}

/// Cache entry for one module directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryInfo {
    /// A `qmldir` was found, or the entry was registered explicitly.
    pub valid: bool,
    pub status: TypeInfoStatus,
    pub message: Option<String>,
    pub qmldir: Qmldir,
    pub objects: Vec<TypeDescription>,
    pub module_apis: Vec<ModuleApi>,
}

impl LibraryInfo {
    pub fn with_status(status: TypeInfoStatus) -> Self {
        Self {
            valid: true,
            status,
            message: None,
            qmldir: Qmldir::default(),
            objects: Vec::new(),
            module_apis: Vec::new(),
        }
    }

    /// Read `<dir>/qmldir`. A missing file gives an invalid entry.
    pub fn read(dir: &Path) -> Self {
        match std::fs::read_to_string(dir.join("qmldir")) {
            Ok(text) => Self {
                qmldir: Qmldir::parse(&text),
                ..Self::with_status(TypeInfoStatus::NotDumped)
            },
            Err(_) => Self {
                valid: false,
                ..Self::with_status(TypeInfoStatus::NotDumped)
            },
        }
    }

    pub fn set_status(&mut self, status: TypeInfoStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
    }

    /// `typeinfo` entries resolved against `dir`.
    pub fn type_info_paths(&self, dir: &Path) -> Vec<PathBuf> {
        self.qmldir
            .type_infos
            .iter()
            .map(|file| crate::paths::absolute_from(dir, Path::new(file)))
            .collect()
    }
}

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^|;)\s*(name|prototype|uri|version)\s*:\s*"([^"]*)""#).expect("valid regex")
});
static EXPORTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)exports\s*:\s*\[(.*?)\]"#).expect("valid regex"));
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).expect("valid regex"));

/// Structural reader for the `Module { Component { ... } }` format.
#[derive(Debug, Default, Clone, Copy)]
pub struct QmltypesParser;

impl QmltypesParser {
    /// Top-level `Kind { ... }` blocks inside the first `Module` block,
    /// each with nested blocks blanked out.
    fn blocks(source: &str) -> Result<Vec<(String, String)>, String> {
        let Some(module_at) = source.find("Module") else {
            return Err("expected a Module block".to_string());
        };
        let body = &source[module_at..];
        let Some(open) = body.find('{') else {
            return Err("expected '{' after Module".to_string());
        };

        let mut blocks = Vec::new();
        let mut depth = 0usize;
        let mut current: Option<(String, String)> = None;
        let mut word = String::new();
        for ch in body[open + 1..].chars() {
            match ch {
                '{' => {
                    depth += 1;
                    if depth == 1 {
                        current = Some((word.trim().to_string(), String::new()));
                    }
                    word.clear();
                }
                '}' if depth == 0 => return Ok(blocks),
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        blocks.extend(current.take());
                    }
                }
                _ if depth == 0 => {
                    if ch.is_whitespace() {
                        if !word.trim().is_empty() && !word.ends_with(' ') {
                            word.push(' ');
                        }
                    } else {
                        if word.ends_with(' ') {
                            word.clear();
                        }
                        word.push(ch);
                    }
                }
                _ if depth == 1 => {
                    if let Some((_, text)) = current.as_mut() {
                        text.push(ch);
                    }
                }
                _ => {}
            }
        }
        Err("unbalanced braces".to_string())
    }
}

impl TypeDescriptionParser for QmltypesParser {
    fn parse(&self, source: &str, file_name: &str) -> ParsedTypes {
        let blocks = match Self::blocks(source) {
            Ok(blocks) => blocks,
            Err(message) => {
                return ParsedTypes {
                    error: Some(format!("{file_name}: {message}")),
                    ..ParsedTypes::default()
                };
            }
        };

        let mut parsed = ParsedTypes::default();
        let mut unnamed = 0;
        for (kind, text) in blocks {
            let field = |name: &str| {
                FIELD
                    .captures_iter(&text)
                    .find(|c| &c[1] == name)
                    .map(|c| c[2].to_string())
            };
            match kind.as_str() {
                "Component" => match field("name") {
                    Some(name) => {
                        let exports = EXPORTS
                            .captures(&text)
                            .map(|c| {
                                QUOTED
                                    .captures_iter(&c[1])
                                    .map(|q| q[1].to_string())
                                    .collect()
                            })
                            .unwrap_or_default();
                        parsed.objects.push(TypeDescription {
                            name,
                            prototype: field("prototype"),
                            exports,
                        });
                    }
                    None => unnamed += 1,
                },
                "ModuleApi" => {
                    if let Some(uri) = field("uri") {
                        parsed.module_apis.push(ModuleApi {
                            uri,
                            version: field("version").unwrap_or_default(),
                        });
                    }
                }
                _ => {}
            }
        }
        if unnamed > 0 {
            parsed.warning = Some(format!("{file_name}: {unnamed} component(s) without a name"));
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qmldir_parse() {
        let qmldir = Qmldir::parse(
            "module Shapes\nplugin shapesplugin\nplugin extra lib # native\ntypeinfo shapes.qmltypes\nRect 1.0 Rect.qml\n",
        );
        assert_eq!(qmldir.module.as_deref(), Some("Shapes"));
        assert_eq!(qmldir.plugins.len(), 2);
        assert_eq!(qmldir.plugins[1].path, "lib");
        assert_eq!(qmldir.type_infos, vec!["shapes.qmltypes"]);
    }

    #[test]
    fn test_parse_components() {
        let source = r#"import QtQuick.tooling 1.1
Module {
    Component {
        name: "Circle"
        prototype: "QQuickItem"
        exports: ["Shapes/Circle 1.0", "Shapes/Circle 1.1"]
        Property { name: "radius"; type: "double" }
    }
    Component { prototype: "QObject" }
    ModuleApi { uri: "Shapes"; version: "1.0"; name: "Api" }
}
"#;
        let parsed = QmltypesParser.parse(source, "shapes.qmltypes");
        assert!(parsed.error.is_none());
        assert_eq!(parsed.objects.len(), 1);
        let circle = &parsed.objects[0];
        assert_eq!(circle.name, "Circle");
        assert_eq!(circle.prototype.as_deref(), Some("QQuickItem"));
        assert_eq!(circle.exports.len(), 2);
        assert!(parsed.warning.is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(QmltypesParser.parse("nothing here", "x").error.is_some());
        assert!(QmltypesParser.parse("Module { Component {", "x").error.is_some());
    }
}

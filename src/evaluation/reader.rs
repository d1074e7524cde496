//! Reader abstraction shared by the exact and cumulative passes.
//!
//! A unit update only talks to [`EvaluationReader`]; the scheduler obtains
//! readers from a [`ReaderFactory`], which lets tests substitute canned
//! variable tables for real evaluation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{EvaluationError, EvaluationResult};
use super::parser::{Statement, parse_source};
use crate::paths::clean_path;
use crate::types::{NodeId, ProjectType};

/// A parsed build file. Cheap to clone; equality is by path.
#[derive(Clone)]
pub struct ProFile {
    inner: Arc<ProFileData>,
}

struct ProFileData {
    path: PathBuf,
    statements: Vec<Statement>,
}

impl ProFile {
    pub fn parse(path: &Path) -> EvaluationResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| EvaluationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_source(path, &text)
    }

    pub fn from_source(path: &Path, text: &str) -> EvaluationResult<Self> {
        let statements = parse_source(path, text)?;
        Ok(Self {
            inner: Arc::new(ProFileData {
                path: path.to_path_buf(),
                statements,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn directory(&self) -> &Path {
        self.inner.path.parent().unwrap_or(Path::new(""))
    }

    pub fn statements(&self) -> &[Statement] {
        &self.inner.statements
    }
}

impl PartialEq for ProFile {
    fn eq(&self, other: &Self) -> bool {
        self.inner.path == other.inner.path
    }
}

impl Eq for ProFile {}

impl fmt::Debug for ProFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProFile")
            .field("path", &self.inner.path)
            .field("statements", &self.inner.statements.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Full evaluation including feature files.
    All,
    /// Only the files loaded before the project body.
    PreFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderMode {
    /// Conditions are honored; one configuration.
    Exact,
    /// Every branch is taken and removals are ignored, giving the union
    /// of all configurations.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    Application,
    Library,
    Script,
    Aux,
    SubDirs,
    Unknown,
}

impl TemplateType {
    pub fn from_template(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "" | "app" | "vcapp" => Self::Application,
            "lib" | "vclib" => Self::Library,
            "subdirs" | "vcsubdirs" => Self::SubDirs,
            "aux" => Self::Aux,
            "script" => Self::Script,
            _ => Self::Unknown,
        }
    }

    pub fn project_type(self) -> ProjectType {
        match self {
            Self::Application | Self::Unknown => ProjectType::Application,
            Self::Library => ProjectType::Library,
            Self::Script => ProjectType::Script,
            Self::Aux => ProjectType::Aux,
            Self::SubDirs => ProjectType::SubDirs,
        }
    }
}

/// What a worker needs to evaluate one `.pro` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalRequest {
    pub unit: NodeId,
    pub pro_file: PathBuf,
    pub build_dir: PathBuf,
}

pub trait EvaluationReader: Send {
    fn mode(&self) -> ReaderMode;

    /// Parse (or fetch from cache) the file at `path`.
    fn parse(&mut self, path: &Path) -> Option<ProFile>;

    /// Evaluate `file`. `false` means the result cannot be trusted.
    fn accept(&mut self, file: &ProFile, load: LoadMode) -> bool;

    fn values(&self, name: &str) -> Vec<String>;

    /// Values contributed by assignments inside `file` only.
    fn values_in(&self, name: &str, file: &Path) -> Vec<String>;

    fn is_defined(&self, name: &str) -> bool;

    /// Every file read during the last `accept`, root first.
    fn include_files(&self) -> Vec<PathBuf>;

    fn template_type(&self) -> TemplateType;

    fn diagnostics(&self) -> &[EvaluationError];

    fn value(&self, name: &str) -> String {
        self.values(name).join(" ")
    }

    /// Resolve file values the way qmake does: absolute paths as-is,
    /// relative ones against `search_dirs` first and `base_dir` last.
    /// Wildcards in the final component are expanded; entries that do
    /// not exist are dropped.
    fn absolute_file_values(
        &self,
        name: &str,
        base_dir: &Path,
        search_dirs: &[PathBuf],
        file: Option<&Path>,
    ) -> Vec<PathBuf> {
        let values = match file {
            Some(file) => self.values_in(name, file),
            None => self.values(name),
        };
        let mut result = Vec::new();
        for value in values.iter().filter(|v| !v.is_empty()) {
            let candidate = Path::new(value);
            let absolute = if candidate.is_absolute() {
                if candidate.exists() {
                    result.push(clean_path(candidate));
                    continue;
                }
                clean_path(candidate)
            } else {
                if let Some(found) = search_dirs
                    .iter()
                    .map(|dir| dir.join(candidate))
                    .find(|p| p.exists())
                {
                    result.push(clean_path(&found));
                    continue;
                }
                if base_dir.as_os_str().is_empty() {
                    continue;
                }
                clean_path(&base_dir.join(candidate))
            };
            result.extend(expand_wildcard(&absolute));
        }
        result
    }

    /// Values resolved against `base_dir` without touching the disk.
    fn absolute_path_values(&self, name: &str, base_dir: &Path) -> Vec<PathBuf> {
        self.values(name)
            .iter()
            .filter(|v| !v.is_empty())
            .map(|v| crate::paths::absolute_from(base_dir, Path::new(v)))
            .collect()
    }
}

fn expand_wildcard(path: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Vec::new();
    };
    let name = name.to_string_lossy();
    if !(name.contains('*') || name.contains('?')) || !dir.is_dir() {
        return Vec::new();
    }
    let pattern = format!(
        "{}/{name}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries.filter_map(Result::ok).collect();
    found.sort();
    found
}

/// Creates readers for the evaluation workers.
pub trait ReaderFactory: Send + Sync {
    fn create(&self, mode: ReaderMode, request: &EvalRequest) -> Box<dyn EvaluationReader>;
}

//! In-process evaluator for `.pro`/`.pri` files.
//!
//! Exact mode follows one configuration: conditions are tested against the
//! configured platform scopes and `CONFIG`. Anything it cannot decide (an
//! unknown test function, a missing include, `error()`) makes the result
//! untrustworthy and `accept` returns `false`.
//!
//! Cumulative mode takes every branch, ignores `-=`/`~=` and treats `=` as
//! accumulate, so the result is the union over all configurations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::error::EvaluationError;
use super::parser::{AssignOp, Condition, Statement, split_args};
use super::reader::{
    EvalRequest, EvaluationReader, LoadMode, ProFile, ReaderFactory, ReaderMode, TemplateType,
};
use crate::config::EvaluationConfig;
use crate::paths::{absolute_from, clean_path};

/// Source index for values seeded before any file is read.
const BUILTIN_SOURCE: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Value {
    text: String,
    source: usize,
}

/// Per-evaluation environment.
#[derive(Debug, Clone, Default)]
pub struct ReaderContext {
    pub platform_scopes: Vec<String>,
    pub config: Vec<String>,
    pub build_dir: PathBuf,
}

pub struct QmakeReader {
    mode: ReaderMode,
    context: ReaderContext,
    cache: HashMap<PathBuf, ProFile>,
    vars: HashMap<String, Vec<Value>>,
    files: Vec<PathBuf>,
    file_index: HashMap<PathBuf, usize>,
    include_stack: Vec<PathBuf>,
    root: PathBuf,
    unresolved: bool,
    aborted: bool,
    diagnostics: Vec<EvaluationError>,
}

impl QmakeReader {
    pub fn new(mode: ReaderMode, context: ReaderContext) -> Self {
        Self {
            mode,
            context,
            cache: HashMap::new(),
            vars: HashMap::new(),
            files: Vec::new(),
            file_index: HashMap::new(),
            include_stack: Vec::new(),
            root: PathBuf::new(),
            unresolved: false,
            aborted: false,
            diagnostics: Vec::new(),
        }
    }

    fn exact(&self) -> bool {
        self.mode == ReaderMode::Exact
    }

    fn mark_unresolved(&mut self) {
        if self.exact() {
            self.unresolved = true;
        }
    }

    fn reset(&mut self, root: &Path) {
        self.vars.clear();
        self.files.clear();
        self.file_index.clear();
        self.include_stack.clear();
        self.unresolved = false;
        self.aborted = false;
        self.root = root.to_path_buf();

        let config = self
            .context
            .config
            .iter()
            .map(|c| Value {
                text: c.clone(),
                source: BUILTIN_SOURCE,
            })
            .collect();
        self.vars.insert("CONFIG".to_string(), config);
    }

    fn register(&mut self, path: &Path) -> usize {
        if let Some(idx) = self.file_index.get(path) {
            return *idx;
        }
        let idx = self.files.len();
        self.files.push(path.to_path_buf());
        self.file_index.insert(path.to_path_buf(), idx);
        idx
    }

    fn dir_of(&self, file: usize) -> PathBuf {
        self.files
            .get(file)
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn exec_block(&mut self, statements: &[Statement], file: usize) {
        for statement in statements {
            if self.aborted {
                return;
            }
            match statement {
                Statement::Assign {
                    name, op, values, ..
                } => {
                    let name = self.expand_joined(name, file);
                    let mut expanded = Vec::new();
                    for word in values {
                        expanded.extend(self.expand(word, file));
                    }
                    self.assign(name, *op, expanded, file);
                }
                Statement::Scope {
                    condition,
                    then,
                    otherwise,
                    ..
                } => {
                    let hit = self.test(condition, file);
                    if self.exact() {
                        let branch = if hit { then } else { otherwise };
                        self.exec_block(branch, file);
                    } else {
                        self.exec_block(then, file);
                        self.exec_block(otherwise, file);
                    }
                }
                Statement::Call { name, args, .. } => self.call(name, args, file),
            }
        }
    }

    fn assign(&mut self, name: String, op: AssignOp, values: Vec<String>, file: usize) {
        let exact = self.exact();
        let entry = self.vars.entry(name).or_default();
        let wrap = |text: String| Value { text, source: file };

        match op {
            AssignOp::Set if exact => {
                *entry = values.into_iter().map(wrap).collect();
            }
            AssignOp::Set | AssignOp::AppendUnique => {
                for text in values {
                    if !entry.iter().any(|v| v.text == text) {
                        entry.push(wrap(text));
                    }
                }
            }
            AssignOp::Append => entry.extend(values.into_iter().map(wrap)),
            AssignOp::Remove if exact => entry.retain(|v| !values.contains(&v.text)),
            AssignOp::Replace if exact => {
                let Some(expr) = values.first() else { return };
                match SedExpr::parse(expr) {
                    Some(sed) => {
                        for value in entry.iter_mut() {
                            value.text = sed.apply(&value.text);
                        }
                    }
                    None => tracing::debug!("[evaluation] ignoring malformed ~= '{expr}'"),
                }
            }
            AssignOp::Remove | AssignOp::Replace => {}
        }
    }

    fn call(&mut self, name: &str, args: &[String], file: usize) {
        match name {
            "error" => {
                if self.exact() {
                    let message = self.expand_joined(&args.join(", "), file);
                    self.diagnostics.push(EvaluationError::Aborted {
                        path: self.files.get(file).cloned().unwrap_or_default(),
                        message,
                    });
                    self.aborted = true;
                }
            }
            "message" | "warning" | "log" => {
                let text = self.expand_joined(&args.join(", "), file);
                tracing::debug!("[evaluation] {name}(): {text}");
            }
            "unset" => {
                if self.exact() {
                    if let Some(var) = args.first() {
                        self.vars.remove(var.as_str());
                    }
                }
            }
            "export" | "requires" => {}
            _ => {
                if self.test_function(name, args, file).is_none() {
                    tracing::debug!("[evaluation] unknown function {name}()");
                    self.mark_unresolved();
                }
            }
        }
    }

    fn test(&mut self, condition: &Condition, file: usize) -> bool {
        match condition {
            Condition::And(left, right) => {
                let l = self.test(left, file);
                if !l && self.exact() {
                    return false;
                }
                let r = self.test(right, file);
                l && r
            }
            Condition::Or(left, right) => {
                let l = self.test(left, file);
                if l && self.exact() {
                    return true;
                }
                let r = self.test(right, file);
                l || r
            }
            Condition::Test {
                negated,
                name,
                args,
            } => {
                let result = match args {
                    None => Some(self.scope_active(name)),
                    Some(args) => self.test_function(name, args, file),
                };
                match result {
                    Some(value) => value != *negated,
                    None => {
                        tracing::debug!("[evaluation] unknown test {name}()");
                        self.mark_unresolved();
                        false
                    }
                }
            }
        }
    }

    fn scope_active(&self, name: &str) -> bool {
        match name {
            "true" => true,
            "false" => false,
            _ => {
                let matches = |candidate: &str| match glob::Pattern::new(name) {
                    Ok(pattern) if name.contains(['*', '?']) => pattern.matches(candidate),
                    _ => candidate == name,
                };
                self.context.platform_scopes.iter().any(|s| matches(s))
                    || self.values("CONFIG").iter().any(|c| matches(c))
            }
        }
    }

    /// `None` when the function is unknown.
    fn test_function(&mut self, name: &str, raw_args: &[String], file: usize) -> Option<bool> {
        let args: Vec<String> = raw_args
            .iter()
            .map(|a| self.expand_joined(a, file))
            .collect();
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("");

        let result = match name {
            "true" => true,
            "false" => false,
            "isEmpty" => self.values(arg(0)).is_empty(),
            "contains" => {
                let pattern = full_match_regex(arg(1));
                self.values(arg(0)).iter().any(|v| match &pattern {
                    Some(re) => re.is_match(v),
                    None => v == arg(1),
                })
            }
            "exists" => {
                let path = absolute_from(&self.dir_of(file), Path::new(arg(0)));
                if arg(0).contains(['*', '?']) {
                    glob::glob(&path.to_string_lossy())
                        .map(|mut paths| paths.next().is_some())
                        .unwrap_or(false)
                } else {
                    path.exists()
                }
            }
            "equals" | "isEqual" => self.values(arg(0)).join(" ") == arg(1),
            "CONFIG" | "isActiveConfig" => self.config_active(arg(0), args.get(1)),
            "defined" => match arg(1) {
                "" | "var" => self.vars.contains_key(arg(0)),
                _ => false,
            },
            "include" => self.include(arg(0), file),
            "load" => true,
            "greaterThan" | "lessThan" => {
                let lhs = self.values(arg(0)).first().and_then(|v| v.parse::<i64>().ok());
                match (lhs, arg(1).parse::<i64>().ok()) {
                    (Some(l), Some(r)) if name == "greaterThan" => l > r,
                    (Some(l), Some(r)) => l < r,
                    _ => false,
                }
            }
            "count" => {
                let count = self.values(arg(0)).len();
                let expected = arg(1).parse::<usize>().ok()?;
                match arg(2) {
                    "greaterThan" | ">" => count > expected,
                    "lessThan" | "<" => count < expected,
                    _ => count == expected,
                }
            }
            _ => return None,
        };
        Some(result)
    }

    fn config_active(&self, name: &str, mutuals: Option<&String>) -> bool {
        let config = self.values("CONFIG");
        match mutuals {
            None => config.iter().any(|c| c == name),
            Some(mutuals) => {
                let set: Vec<&str> = mutuals.split('|').collect();
                config
                    .iter()
                    .rev()
                    .find(|c| set.contains(&c.as_str()))
                    .is_some_and(|c| c == name)
            }
        }
    }

    fn include(&mut self, target: &str, file: usize) -> bool {
        if target.is_empty() {
            return false;
        }
        let path = absolute_from(&self.dir_of(file), Path::new(target));
        if self.include_stack.contains(&path) {
            self.diagnostics
                .push(EvaluationError::RecursiveInclude { path });
            self.mark_unresolved();
            return false;
        }
        let Some(pro_file) = self.parse(&path) else {
            if self.exact() {
                self.diagnostics
                    .push(EvaluationError::MissingInclude { path });
            }
            self.mark_unresolved();
            return false;
        };
        let idx = self.register(&path);
        self.include_stack.push(path);
        self.exec_block(pro_file.statements(), idx);
        self.include_stack.pop();
        true
    }

    /// Expand a word. A word consisting of a single reference expands to
    /// that list; anything else is concatenated into one value.
    fn expand(&mut self, word: &str, file: usize) -> Vec<String> {
        if !word.contains('$') {
            return vec![word.to_string()];
        }
        let chars: Vec<char> = word.chars().collect();
        let mut out = String::new();
        let mut last_list: Vec<String> = Vec::new();
        let mut references = 0;
        let mut literal = false;
        let mut i = 0;

        while i < chars.len() {
            let double = chars[i] == '$' && chars.get(i + 1) == Some(&'$');
            let env = chars[i] == '$' && chars.get(i + 1) == Some(&'(');
            if double || env {
                let (values, next) = if double {
                    self.expand_reference(&chars, i + 2, file)
                } else {
                    let (name, next) = take_until(&chars, i + 2, ')');
                    (env_values(&name), next)
                };
                if next == i + 2 && double {
                    out.push_str("$$");
                    literal = true;
                    i = next;
                    continue;
                }
                out.push_str(&values.join(" "));
                last_list = values;
                references += 1;
                i = next;
            } else {
                out.push(chars[i]);
                literal = true;
                i += 1;
            }
        }

        if references == 1 && !literal {
            last_list
        } else if out.is_empty() {
            Vec::new()
        } else {
            vec![out]
        }
    }

    fn expand_joined(&mut self, word: &str, file: usize) -> String {
        self.expand(word, file).join(" ")
    }

    /// Expand the reference starting right after `$$`; returns the values
    /// and the index after the reference.
    fn expand_reference(&mut self, chars: &[char], start: usize, file: usize) -> (Vec<String>, usize) {
        match chars.get(start) {
            Some('{') => {
                let (name, next) = take_until(chars, start + 1, '}');
                (self.variable_values(&name, file), next)
            }
            Some('(') => {
                let (name, next) = take_until(chars, start + 1, ')');
                (env_values(&name), next)
            }
            Some('[') => {
                let (_property, next) = take_until(chars, start + 1, ']');
                (Vec::new(), next)
            }
            _ => {
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || matches!(chars[end], '_' | '.')) {
                    end += 1;
                }
                if end == start {
                    return (Vec::new(), start);
                }
                let name: String = chars[start..end].iter().collect();
                if chars.get(end) == Some(&'(') {
                    let Some(close) = matching_paren(chars, end) else {
                        return (self.variable_values(&name, file), end);
                    };
                    let inner: String = chars[end + 1..close].iter().collect();
                    let values = self.replace_function(&name, &split_args(&inner), file);
                    (values, close + 1)
                } else {
                    (self.variable_values(&name, file), end)
                }
            }
        }
    }

    fn variable_values(&self, name: &str, file: usize) -> Vec<String> {
        fn single(p: &Path) -> Vec<String> {
            vec![p.to_string_lossy().into_owned()]
        }
        match name {
            "PWD" | "IN_PWD" => single(&self.dir_of(file)),
            "_PRO_FILE_" => single(&self.root),
            "_PRO_FILE_PWD_" => single(self.root.parent().unwrap_or(Path::new(""))),
            "OUT_PWD" => single(&self.context.build_dir),
            "_FILE_" => self.files.get(file).map(|p| single(p)).unwrap_or_default(),
            "LITERAL_HASH" => vec!["#".to_string()],
            "LITERAL_DOLLAR" => vec!["$".to_string()],
            _ => self.values(name),
        }
    }

    fn replace_function(&mut self, name: &str, raw_args: &[String], file: usize) -> Vec<String> {
        let args: Vec<String> = raw_args
            .iter()
            .map(|a| self.expand_joined(a, file))
            .collect();
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("");
        let base = self.dir_of(file);

        match name {
            "basename" => self
                .values(arg(0))
                .iter()
                .map(|v| {
                    Path::new(v)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                })
                .collect(),
            "dirname" => self
                .values(arg(0))
                .iter()
                .map(|v| {
                    Path::new(v)
                        .parent()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default()
                })
                .collect(),
            "first" => self.values(arg(0)).into_iter().take(1).collect(),
            "last" => self.values(arg(0)).into_iter().last().into_iter().collect(),
            "size" => vec![self.values(arg(0)).len().to_string()],
            "unique" => {
                let mut seen = Vec::new();
                for value in self.values(arg(0)) {
                    if !seen.contains(&value) {
                        seen.push(value);
                    }
                }
                seen
            }
            "member" => {
                let values = self.values(arg(0));
                let index = arg(1).parse::<usize>().unwrap_or(0);
                values.get(index).cloned().into_iter().collect()
            }
            "join" => {
                let values = self.values(arg(0));
                if values.is_empty() {
                    return Vec::new();
                }
                vec![format!("{}{}{}", arg(2), values.join(arg(1)), arg(3))]
            }
            "split" => self
                .values(arg(0))
                .iter()
                .flat_map(|v| {
                    if arg(1).is_empty() {
                        v.split_whitespace().map(str::to_string).collect::<Vec<_>>()
                    } else {
                        v.split(arg(1)).map(str::to_string).collect()
                    }
                })
                .filter(|v| !v.is_empty())
                .collect(),
            "replace" => {
                let Ok(re) = Regex::new(arg(1)) else {
                    return self.values(arg(0));
                };
                self.values(arg(0))
                    .iter()
                    .map(|v| re.replace_all(v, arg(2)).into_owned())
                    .collect()
            }
            "lower" => args.iter().map(|a| a.to_lowercase()).collect(),
            "upper" => args.iter().map(|a| a.to_uppercase()).collect(),
            "quote" | "escape_expand" | "list" | "shell_path" | "system_path" | "native_path" => {
                args.iter().filter(|a| !a.is_empty()).cloned().collect()
            }
            "absolute_path" => {
                let against = if arg(1).is_empty() {
                    base
                } else {
                    absolute_from(&base, Path::new(arg(1)))
                };
                vec![absolute_from(&against, Path::new(arg(0))).to_string_lossy().into_owned()]
            }
            "clean_path" => vec![clean_path(Path::new(arg(0))).to_string_lossy().into_owned()],
            "relative_path" => {
                let against = if arg(1).is_empty() { base.clone() } else { PathBuf::from(arg(1)) };
                let target = absolute_from(&base, Path::new(arg(0)));
                crate::paths::relative_to(&target, &against)
                    .map(|p| vec![p.to_string_lossy().into_owned()])
                    .unwrap_or_default()
            }
            "files" => files_matching(&base, arg(0), arg(1) == "true"),
            _ => {
                tracing::debug!("[evaluation] unknown replace function $${name}()");
                self.mark_unresolved();
                Vec::new()
            }
        }
    }
}

impl EvaluationReader for QmakeReader {
    fn mode(&self) -> ReaderMode {
        self.mode
    }

    fn parse(&mut self, path: &Path) -> Option<ProFile> {
        if let Some(cached) = self.cache.get(path) {
            return Some(cached.clone());
        }
        match ProFile::parse(path) {
            Ok(pro_file) => {
                self.cache.insert(path.to_path_buf(), pro_file.clone());
                Some(pro_file)
            }
            Err(e) => {
                self.diagnostics.push(e);
                None
            }
        }
    }

    fn accept(&mut self, file: &ProFile, _load: LoadMode) -> bool {
        self.reset(file.path());
        let idx = self.register(file.path());
        self.include_stack.push(file.path().to_path_buf());
        self.exec_block(file.statements(), idx);
        self.include_stack.pop();

        match self.mode {
            ReaderMode::Exact => !self.aborted && !self.unresolved,
            ReaderMode::Cumulative => true,
        }
    }

    fn values(&self, name: &str) -> Vec<String> {
        self.vars
            .get(name)
            .map(|values| values.iter().map(|v| v.text.clone()).collect())
            .unwrap_or_default()
    }

    fn values_in(&self, name: &str, file: &Path) -> Vec<String> {
        let Some(idx) = self.file_index.get(file) else {
            return Vec::new();
        };
        self.vars
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .filter(|v| v.source == *idx)
                    .map(|v| v.text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_defined(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    fn include_files(&self) -> Vec<PathBuf> {
        self.files.clone()
    }

    fn template_type(&self) -> TemplateType {
        TemplateType::from_template(&self.value("TEMPLATE"))
    }

    fn diagnostics(&self) -> &[EvaluationError] {
        &self.diagnostics
    }
}

/// Builds [`QmakeReader`]s from the evaluation settings.
#[derive(Debug, Clone)]
pub struct QmakeReaderFactory {
    platform_scopes: Vec<String>,
    config: Vec<String>,
}

impl QmakeReaderFactory {
    pub fn new(config: &EvaluationConfig) -> Self {
        Self {
            platform_scopes: config.platform_scopes.clone(),
            config: config.config.clone(),
        }
    }
}

impl ReaderFactory for QmakeReaderFactory {
    fn create(&self, mode: ReaderMode, request: &EvalRequest) -> Box<dyn EvaluationReader> {
        Box::new(QmakeReader::new(
            mode,
            ReaderContext {
                platform_scopes: self.platform_scopes.clone(),
                config: self.config.clone(),
                build_dir: request.build_dir.clone(),
            },
        ))
    }
}

/// `\1` style group references in a sed replacement.
static BACKREFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(\d)").expect("valid regex"));

/// `s/before/after/[g]`
struct SedExpr {
    regex: Regex,
    replacement: String,
    global: bool,
}

impl SedExpr {
    fn parse(expr: &str) -> Option<Self> {
        let mut chars = expr.chars();
        if chars.next()? != 's' {
            return None;
        }
        let separator = chars.next()?;
        let parts: Vec<&str> = expr[1 + separator.len_utf8()..].split(separator).collect();
        if parts.len() < 2 {
            return None;
        }
        let replacement = BACKREFERENCE.replace_all(parts[1], "$${$1}").into_owned();
        Some(Self {
            regex: Regex::new(parts[0]).ok()?,
            replacement,
            global: parts.get(2).is_some_and(|flags| flags.contains('g')),
        })
    }

    fn apply(&self, text: &str) -> String {
        if self.global {
            self.regex.replace_all(text, self.replacement.as_str()).into_owned()
        } else {
            self.regex.replace(text, self.replacement.as_str()).into_owned()
        }
    }
}

fn full_match_regex(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).ok()
}

fn take_until(chars: &[char], start: usize, close: char) -> (String, usize) {
    match chars[start.min(chars.len())..].iter().position(|&c| c == close) {
        Some(offset) => (chars[start..start + offset].iter().collect(), start + offset + 1),
        None => (chars[start.min(chars.len())..].iter().collect(), chars.len()),
    }
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn env_values(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| vec![v])
        .unwrap_or_default()
}

/// `$$files(pattern[, recursive])`; results keep the pattern's relative form.
fn files_matching(base: &Path, pattern: &str, recursive: bool) -> Vec<String> {
    let absolute = absolute_from(base, Path::new(pattern));
    let (Some(dir), Some(name)) = (absolute.parent(), absolute.file_name()) else {
        return Vec::new();
    };
    let Ok(matcher) = glob::Pattern::new(&name.to_string_lossy()) else {
        return Vec::new();
    };
    let depth = if recursive { usize::MAX } else { 1 };
    let mut found: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| matcher.matches(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect();
    found.sort();

    let relative = !Path::new(pattern).is_absolute();
    found
        .into_iter()
        .map(|p| match p.strip_prefix(base) {
            Ok(stripped) if relative => stripped.to_string_lossy().into_owned(),
            _ => p.to_string_lossy().into_owned(),
        })
        .collect()
}

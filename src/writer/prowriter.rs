//! Line-oriented edits of build-file text.
//!
//! Only the lines that carry a touched value are rewritten; everything else,
//! including comments, indentation and scopes, is left byte for byte.

use std::path::{Path, PathBuf};

use crate::paths::absolute_from;

const DEFAULT_INDENT: &str = "    ";

/// One `VAR op values` assignment, possibly continued over several lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    /// Inclusive.
    end: usize,
    /// Byte offset just past the operator on the first line.
    op_end: usize,
    appending: bool,
    depth: usize,
}

/// The code part of a line and its trailing comment, if any.
fn split_comment(line: &str) -> (&str, Option<&str>) {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return (&line[..i], Some(&line[i..])),
            _ => {}
        }
    }
    (line, None)
}

fn continues(line: &str) -> bool {
    split_comment(line).0.trim_end().ends_with('\\')
}

/// Net brace depth change of a line, ignoring `$${…}` references.
fn brace_delta(line: &str) -> isize {
    let code = split_comment(line).0;
    let mut delta = 0;
    let mut in_quotes = false;
    let mut reference = 0usize;
    let mut prev = '\0';
    for c in code.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '{' if !in_quotes && prev == '$' => reference += 1,
            '}' if !in_quotes && reference > 0 => reference -= 1,
            '{' if !in_quotes => delta += 1,
            '}' if !in_quotes => delta -= 1,
            _ => {}
        }
        prev = c;
    }
    delta
}

/// `(op_end, appending)` if `line` assigns `var` with `=`, `+=` or `*=`.
fn assignment_of(line: &str, var: &str) -> Option<(usize, bool)> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();
    let rest = trimmed.strip_prefix(var)?;
    let after = rest.trim_start();
    let gap = rest.len() - after.len();
    let (op_len, appending) = if after.starts_with("+=") || after.starts_with("*=") {
        (2, true)
    } else if after.starts_with('=') {
        (1, false)
    } else {
        return None;
    };
    Some((indent + var.len() + gap + op_len, appending))
}

fn find_spans(lines: &[String], var: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut depth: isize = 0;
    let mut i = 0;
    while i < lines.len() {
        let start = i;
        while continues(&lines[i]) && i + 1 < lines.len() {
            i += 1;
        }
        if let Some((op_end, appending)) = assignment_of(&lines[start], var) {
            spans.push(Span {
                start,
                end: i,
                op_end,
                appending,
                depth: depth.max(0) as usize,
            });
        } else {
            for line in &lines[start..=i] {
                depth += brace_delta(line);
            }
        }
        i += 1;
    }
    spans
}

/// Whitespace-separated words, double quotes kept.
fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn quote_if_needed(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Append `values` to the last top-level `var +=`/`var =` assignment, or add
/// a new `var +=` block at the end.
pub fn add_values(lines: &mut Vec<String>, var: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    let values: Vec<String> = values.iter().map(|v| quote_if_needed(v)).collect();

    let span = find_spans(lines, var).into_iter().rev().find(|s| s.depth == 0);
    let Some(span) = span else {
        lines.push(format!("{var} += \\"));
        let at = lines.len();
        push_block(lines, at, DEFAULT_INDENT, &values);
        return;
    };

    let last = span.end;
    let (code, comment) = split_comment(&lines[last]);
    if comment.is_some() {
        lines.insert(last + 1, format!("{var} += {}", values.join(" ")));
        return;
    }
    let indent = if span.end > span.start {
        leading_whitespace(&lines[span.end]).to_string()
    } else {
        DEFAULT_INDENT.to_string()
    };
    lines[last] = format!("{} \\", code.trim_end());
    push_block(lines, last + 1, &indent, &values);
}

fn push_block(lines: &mut Vec<String>, at: usize, indent: &str, values: &[String]) {
    let count = values.len();
    for (offset, value) in values.iter().enumerate() {
        let tail = if offset + 1 < count { " \\" } else { "" };
        lines.insert(at + offset, format!("{indent}{value}{tail}"));
    }
}

/// Absolute path a written value refers to.
fn resolve_value(token: &str, pro_dir: &Path) -> PathBuf {
    let unquoted = token.trim_matches('"');
    let stripped = ["$$PWD/", "$${PWD}/", "$$_PRO_FILE_PWD_/", "$${_PRO_FILE_PWD_}/"]
        .iter()
        .find_map(|prefix| unquoted.strip_prefix(prefix))
        .unwrap_or(unquoted);
    absolute_from(pro_dir, Path::new(stripped))
}

struct LineParts {
    prefix: String,
    tokens: Vec<String>,
    continued: bool,
    comment: Option<String>,
    dirty: bool,
}

impl LineParts {
    fn parse(line: &str, prefix_end: Option<usize>) -> Self {
        let (code, comment) = split_comment(line);
        let (prefix, body) = match prefix_end {
            Some(end) => (code[..end].to_string(), &code[end..]),
            None => (leading_whitespace(code).to_string(), code),
        };
        let body = body.trim_end();
        let (body, continued) = match body.strip_suffix('\\') {
            Some(rest) => (rest, true),
            None => (body, false),
        };
        Self {
            prefix,
            tokens: tokenize(body),
            continued,
            comment: comment.map(str::to_string),
            dirty: false,
        }
    }

    fn render(&self) -> String {
        let mut out = self.prefix.clone();
        if !self.tokens.is_empty() {
            if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                out.push(' ');
            }
            out.push_str(&self.tokens.join(" "));
        }
        if self.continued {
            out.push_str(" \\");
        }
        if let Some(comment) = &self.comment {
            out.push(' ');
            out.push_str(comment);
        }
        out
    }
}

/// Remove every entry of `vars` that names one of `files`.
///
/// Returns the files no entry matched.
pub fn remove_values(lines: &mut Vec<String>, pro_dir: &Path, files: &[PathBuf], vars: &[&str]) -> Vec<PathBuf> {
    let mut matched = vec![false; files.len()];
    for var in vars {
        for span in find_spans(lines, var).into_iter().rev() {
            remove_in_span(lines, span, pro_dir, files, &mut matched);
        }
    }
    files
        .iter()
        .zip(matched)
        .filter(|(_, found)| !found)
        .map(|(file, _)| file.clone())
        .collect()
}

fn remove_in_span(lines: &mut Vec<String>, span: Span, pro_dir: &Path, files: &[PathBuf], matched: &mut [bool]) {
    let mut parts: Vec<LineParts> = (span.start..=span.end)
        .map(|i| LineParts::parse(&lines[i], (i == span.start).then_some(span.op_end)))
        .collect();

    let mut any = false;
    for part in parts.iter_mut() {
        let before = part.tokens.len();
        part.tokens.retain(|token| {
            let resolved = resolve_value(token, pro_dir);
            match files.iter().position(|f| *f == resolved) {
                Some(idx) => {
                    matched[idx] = true;
                    false
                }
                None => true,
            }
        });
        if part.tokens.len() != before {
            part.dirty = true;
            any = true;
        }
    }
    if !any {
        return;
    }

    let emptied = parts.iter().all(|p| p.tokens.is_empty() && p.comment.is_none());
    if emptied && span.appending {
        lines.drain(span.start..=span.end);
        return;
    }

    // Continuation lines left with nothing go away.
    let keep: Vec<bool> = parts
        .iter()
        .enumerate()
        .map(|(i, p)| i == 0 || !(p.dirty && p.tokens.is_empty() && p.comment.is_none()))
        .collect();
    let last_kept = keep.iter().rposition(|k| *k).unwrap_or(0);
    for (i, part) in parts.iter_mut().enumerate() {
        if !keep[i] {
            continue;
        }
        let continued = i < last_kept;
        if part.continued != continued {
            part.continued = continued;
            part.dirty = true;
        }
    }

    for i in (0..parts.len()).rev() {
        let line = span.start + i;
        if !keep[i] {
            lines.remove(line);
        } else if parts[i].dirty {
            lines[line] = parts[i].render();
        }
    }
}

/// Replace the first top-level assignment of `var` with `var = values` on
/// one line, or append one.
pub fn set_values(lines: &mut Vec<String>, var: &str, values: &[String]) {
    let values: Vec<String> = values.iter().map(|v| quote_if_needed(v)).collect();
    let line = if values.is_empty() {
        format!("{var} =")
    } else {
        format!("{var} = {}", values.join(" "))
    };
    match find_spans(lines, var).into_iter().find(|s| s.depth == 0) {
        Some(span) => {
            let indent = leading_whitespace(&lines[span.start]).to_string();
            lines.splice(span.start..=span.end, [format!("{indent}{line}")]);
        }
        None => lines.push(line),
    }
}

/// Split file text into lines the way the rewrite functions expect.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        split_lines(text)
    }

    #[test]
    fn test_add_extends_continuation_block() {
        let mut l = lines("SOURCES += main.cpp \\\n        util.cpp\nHEADERS += util.h\n");
        add_values(&mut l, "SOURCES", &["x.cpp".to_string()]);
        assert_eq!(
            join_lines(&l),
            "SOURCES += main.cpp \\\n        util.cpp \\\n        x.cpp\nHEADERS += util.h\n"
        );
    }

    #[test]
    fn test_add_without_assignment_appends_block() {
        let mut l = lines("TEMPLATE = app");
        add_values(&mut l, "FORMS", &["a.ui".to_string(), "my dialog.ui".to_string()]);
        assert_eq!(
            join_lines(&l),
            "TEMPLATE = app\nFORMS += \\\n    a.ui \\\n    \"my dialog.ui\""
        );
    }

    #[test]
    fn test_add_after_commented_line() {
        let mut l = lines("SOURCES += main.cpp # entry point\n");
        add_values(&mut l, "SOURCES", &["x.cpp".to_string()]);
        assert_eq!(join_lines(&l), "SOURCES += main.cpp # entry point\nSOURCES += x.cpp\n");
    }

    #[test]
    fn test_add_skips_scoped_assignments() {
        let mut l = lines("SOURCES += a.cpp\nwin32 {\n    SOURCES += w.cpp\n}\n");
        add_values(&mut l, "SOURCES", &["b.cpp".to_string()]);
        assert_eq!(l[0], "SOURCES += a.cpp \\");
        assert_eq!(l[1], "    b.cpp");
        assert_eq!(l[3], "    SOURCES += w.cpp");
    }

    #[test]
    fn test_round_trip_restores_text() {
        let original = "TEMPLATE = app\nSOURCES += main.cpp \\\n    util.cpp\n\nHEADERS = util.h\n";
        let pro_dir = Path::new("/p");
        let mut l = lines(original);
        add_values(&mut l, "SOURCES", &["x.cpp".to_string()]);
        let missing = remove_values(&mut l, pro_dir, &[PathBuf::from("/p/x.cpp")], &["SOURCES"]);
        assert!(missing.is_empty());
        assert_eq!(join_lines(&l), original);

        let single = "SOURCES += main.cpp";
        let mut l = lines(single);
        add_values(&mut l, "SOURCES", &["x.cpp".to_string()]);
        remove_values(&mut l, pro_dir, &[PathBuf::from("/p/x.cpp")], &["SOURCES"]);
        assert_eq!(join_lines(&l), single);
    }

    #[test]
    fn test_remove_reports_unmatched_and_drops_empty_assignment() {
        let mut l = lines("OTHER_FILES += $$PWD/readme.txt\nSOURCES += ../shared/a.cpp b.cpp\n");
        let missing = remove_values(
            &mut l,
            Path::new("/p/app"),
            &[
                PathBuf::from("/p/app/readme.txt"),
                PathBuf::from("/p/shared/a.cpp"),
                PathBuf::from("/p/app/none.cpp"),
            ],
            &["SOURCES", "OTHER_FILES"],
        );
        assert_eq!(missing, vec![PathBuf::from("/p/app/none.cpp")]);
        assert_eq!(join_lines(&l), "SOURCES += b.cpp\n");
    }

    #[test]
    fn test_remove_keeps_plain_assignment_line() {
        let mut l = lines("SOURCES = a.cpp");
        remove_values(&mut l, Path::new("/p"), &[PathBuf::from("/p/a.cpp")], &["SOURCES"]);
        assert_eq!(join_lines(&l), "SOURCES =");
    }

    #[test]
    fn test_remove_middle_of_block() {
        let mut l = lines("SOURCES += \\\n    a.cpp \\\n    b.cpp \\\n    c.cpp\n");
        remove_values(&mut l, Path::new("/p"), &[PathBuf::from("/p/b.cpp")], &["SOURCES"]);
        assert_eq!(join_lines(&l), "SOURCES += \\\n    a.cpp \\\n    c.cpp\n");
    }

    #[test]
    fn test_set_values_replaces_first_top_level() {
        let mut l = lines("TARGET = old \\\n    name\nunix {\n    TARGET = other\n}");
        set_values(&mut l, "TARGET", &["fresh".to_string()]);
        assert_eq!(join_lines(&l), "TARGET = fresh\nunix {\n    TARGET = other\n}");

        let mut l = lines("TEMPLATE = app");
        set_values(&mut l, "VERSION", &["1.2".to_string()]);
        assert_eq!(l.last().map(String::as_str), Some("VERSION = 1.2"));
    }
}

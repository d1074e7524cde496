//! Statement parser for `.pro`/`.pri` text.
//!
//! Covers the subset of the language a project tree needs: assignments,
//! scopes with `else`, one-line `cond: statement` forms, `\` continuations
//! and function-call statements such as `include()`.

use super::error::{EvaluationError, EvaluationResult};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `+=`
    Append,
    /// `*=`
    AppendUnique,
    /// `-=`
    Remove,
    /// `~=`
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Test {
        negated: bool,
        name: String,
        args: Option<Vec<String>>,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Assign {
        line: usize,
        name: String,
        op: AssignOp,
        values: Vec<String>,
    },
    Scope {
        line: usize,
        condition: Condition,
        then: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    Call {
        line: usize,
        name: String,
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(usize, String),
    Open(usize),
    Close(usize),
}

/// Parse a whole build file.
pub fn parse_source(path: &Path, text: &str) -> EvaluationResult<Vec<Statement>> {
    let syntax = |line: usize, message: String| EvaluationError::Syntax {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut tokens = Vec::new();
    for (line, logical) in logical_lines(text) {
        tokenize_line(line, &logical, &mut tokens).map_err(|m| syntax(line, m))?;
    }

    let mut pos = 0;
    let statements = parse_block(&tokens, &mut pos, 0).map_err(|(line, m)| syntax(line, m))?;
    Ok(statements)
}

/// Join `\` continuations and drop comments. Yields the first physical
/// line number (1-based) of each logical line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let stripped = strip_comment(raw);
        let trimmed = stripped.trim_end();
        let (body, continues) = match trimmed.strip_suffix('\\') {
            Some(body) => (body, true),
            None => (trimmed, false),
        };

        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        if !entry.1.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(body.trim());

        if !continues {
            if let Some((line, text)) = pending.take() {
                if !text.trim().is_empty() {
                    out.push((line, text));
                }
            }
        }
    }
    if let Some((line, text)) = pending.take() {
        if !text.trim().is_empty() {
            out.push((line, text));
        }
    }
    out
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split a logical line into text runs and top-level braces.
///
/// `$${NAME}` and braces inside parentheses or quotes are text.
fn tokenize_line(line: usize, text: &str, tokens: &mut Vec<Token>) -> Result<(), String> {
    let chars: Vec<char> = text.chars().collect();
    let mut current = String::new();
    let mut paren_depth = 0usize;
    let mut in_quotes = false;
    let mut i = 0;

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            tokens.push(Token::Text(line, trimmed.to_string()));
        }
        current.clear();
    };

    while i < chars.len() {
        let c = chars[i];
        if c == '$' && chars.get(i + 1) == Some(&'$') && chars.get(i + 2) == Some(&'{') {
            let close = chars[i + 3..]
                .iter()
                .position(|&ch| ch == '}')
                .ok_or_else(|| "unterminated $${".to_string())?;
            current.extend(&chars[i..i + 3 + close + 1]);
            i += 3 + close + 1;
            continue;
        }
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => {
                paren_depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                paren_depth = paren_depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
                current.push(c);
            }
            '{' if !in_quotes && paren_depth == 0 => {
                flush(&mut current, tokens);
                tokens.push(Token::Open(line));
            }
            '}' if !in_quotes && paren_depth == 0 => {
                flush(&mut current, tokens);
                tokens.push(Token::Close(line));
            }
            _ => current.push(c),
        }
        i += 1;
    }

    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if paren_depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    flush(&mut current, tokens);
    Ok(())
}

type BlockResult = Result<Vec<Statement>, (usize, String)>;

fn parse_block(tokens: &[Token], pos: &mut usize, depth: usize) -> BlockResult {
    let mut statements: Vec<Statement> = Vec::new();

    loop {
        let Some(token) = tokens.get(*pos) else {
            if depth > 0 {
                let line = tokens.last().map_or(0, token_line);
                return Err((line, "missing '}'".to_string()));
            }
            return Ok(statements);
        };

        match token {
            Token::Close(line) => {
                if depth == 0 {
                    return Err((*line, "unexpected '}'".to_string()));
                }
                *pos += 1;
                return Ok(statements);
            }
            Token::Open(line) => {
                *pos += 1;
                let body = parse_block(tokens, pos, depth + 1)?;
                statements.push(Statement::Scope {
                    line: *line,
                    condition: always(),
                    then: body,
                    otherwise: Vec::new(),
                });
            }
            Token::Text(line, text) => {
                let line = *line;
                let opens_block = matches!(tokens.get(*pos + 1), Some(Token::Open(_)));
                *pos += 1;

                if let Some(rest) = else_clause(text) {
                    let branch = if opens_block {
                        *pos += 1;
                        let body = parse_block(tokens, pos, depth + 1)?;
                        if rest.is_empty() {
                            body
                        } else {
                            vec![Statement::Scope {
                                line,
                                condition: parse_condition(rest).map_err(|m| (line, m))?,
                                then: body,
                                otherwise: Vec::new(),
                            }]
                        }
                    } else {
                        vec![parse_statement(line, rest).map_err(|m| (line, m))?]
                    };
                    attach_else(&mut statements, branch).map_err(|m| (line, m))?;
                    continue;
                }

                if opens_block {
                    *pos += 1;
                    let condition_text = text.trim_end_matches(':').trim();
                    let condition = parse_condition(condition_text).map_err(|m| (line, m))?;
                    let body = parse_block(tokens, pos, depth + 1)?;
                    statements.push(Statement::Scope {
                        line,
                        condition,
                        then: body,
                        otherwise: Vec::new(),
                    });
                } else {
                    statements.push(parse_statement(line, text).map_err(|m| (line, m))?);
                }
            }
        }
    }
}

fn token_line(token: &Token) -> usize {
    match token {
        Token::Text(line, _) | Token::Open(line) | Token::Close(line) => *line,
    }
}

fn always() -> Condition {
    Condition::Test {
        negated: false,
        name: "true".to_string(),
        args: None,
    }
}

/// `else`, `else:rest` or `else: rest`; returns the part after the colon.
fn else_clause(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("else")?;
    if rest.is_empty() {
        return Some("");
    }
    rest.trim_start().strip_prefix(':').map(str::trim)
}

/// Hang `branch` off the innermost open `else` chain of the last scope.
fn attach_else(statements: &mut [Statement], branch: Vec<Statement>) -> Result<(), String> {
    let mut target = match statements.last_mut() {
        Some(Statement::Scope { otherwise, .. }) => otherwise,
        _ => return Err("'else' without a preceding scope".to_string()),
    };
    loop {
        if target.is_empty() {
            *target = branch;
            return Ok(());
        }
        match target.as_mut_slice() {
            [Statement::Scope { otherwise, .. }] => target = otherwise,
            _ => return Err("'else' after a completed else branch".to_string()),
        }
    }
}

/// Parse one statement, with an optional `cond:` prefix.
fn parse_statement(line: usize, text: &str) -> Result<Statement, String> {
    if let Some((op_start, op_end, op)) = find_assignment(text) {
        let lhs = text[..op_start].trim();
        let rhs = text[op_end..].trim();
        let values = split_words(rhs);

        let (condition, name) = match rfind_top_level(lhs, ':') {
            Some(idx) => (Some(lhs[..idx].trim()), lhs[idx + 1..].trim()),
            None => (None, lhs),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(format!("invalid variable name '{name}'"));
        }
        let assign = Statement::Assign {
            line,
            name: name.to_string(),
            op,
            values,
        };
        return match condition {
            Some(cond) => Ok(Statement::Scope {
                line,
                condition: parse_condition(cond)?,
                then: vec![assign],
                otherwise: Vec::new(),
            }),
            None => Ok(assign),
        };
    }

    // `cond1:cond2: call(args)` or a bare condition
    match rfind_top_level(text, ':') {
        Some(idx) => {
            let condition = parse_condition(text[..idx].trim())?;
            let body = text[idx + 1..].trim();
            let then = if body.is_empty() {
                Vec::new()
            } else {
                vec![parse_statement(line, body)?]
            };
            Ok(Statement::Scope {
                line,
                condition,
                then,
                otherwise: Vec::new(),
            })
        }
        None => match parse_call(text)? {
            Some((name, args)) => Ok(Statement::Call { line, name, args }),
            None => Ok(Statement::Scope {
                line,
                condition: parse_condition(text)?,
                then: Vec::new(),
                otherwise: Vec::new(),
            }),
        },
    }
}

/// Locate the first top-level assignment operator.
fn find_assignment(text: &str) -> Option<(usize, usize, AssignOp)> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'(' if !in_quotes => depth += 1,
            b')' if !in_quotes => depth = depth.saturating_sub(1),
            b'=' if !in_quotes && depth == 0 => {
                let (start, op) = match i.checked_sub(1).map(|p| bytes[p]) {
                    Some(b'+') => (i - 1, AssignOp::Append),
                    Some(b'-') => (i - 1, AssignOp::Remove),
                    Some(b'*') => (i - 1, AssignOp::AppendUnique),
                    Some(b'~') => (i - 1, AssignOp::Replace),
                    _ => (i, AssignOp::Set),
                };
                return Some((start, i + 1, op));
            }
            _ => {}
        }
    }
    None
}

fn rfind_top_level(text: &str, needle: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut found = None;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = depth.saturating_sub(1),
            c if c == needle && !in_quotes && depth == 0 => found = Some(i),
            _ => {}
        }
    }
    found
}

/// `name(args)` split into its parts; `None` for anything else.
fn parse_call(text: &str) -> Result<Option<(String, Vec<String>)>, String> {
    let Some(open) = text.find('(') else {
        return Ok(None);
    };
    if !text.ends_with(')') {
        return Ok(None);
    }
    let name = text[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("malformed call '{text}'"));
    }
    let inner = &text[open + 1..text.len() - 1];
    Ok(Some((name.to_string(), split_args(inner))))
}

/// Parse `a:!b|c(x, y)`. `:` and `|` bind left to right with equal weight.
pub fn parse_condition(text: &str) -> Result<Condition, String> {
    let mut terms: Vec<(char, &str)> = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    let mut op = ':';
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = depth.saturating_sub(1),
            ':' | '|' if !in_quotes && depth == 0 => {
                terms.push((op, &text[start..i]));
                op = c;
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push((op, &text[start..]));

    let mut result: Option<Condition> = None;
    for (op, term) in terms {
        let test = parse_test(term.trim())?;
        result = Some(match result {
            None => test,
            Some(left) if op == '|' => Condition::Or(Box::new(left), Box::new(test)),
            Some(left) => Condition::And(Box::new(left), Box::new(test)),
        });
    }
    result.ok_or_else(|| "empty condition".to_string())
}

fn parse_test(term: &str) -> Result<Condition, String> {
    let (negated, body) = match term.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, term),
    };
    if body.is_empty() {
        return Err("empty condition term".to_string());
    }
    match parse_call(body)? {
        Some((name, args)) => Ok(Condition::Test {
            negated,
            name,
            args: Some(args),
        }),
        None => Ok(Condition::Test {
            negated,
            name: body.to_string(),
            args: None,
        }),
    }
}

/// Whitespace-separated words; quotes group and are removed.
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth = 0usize;
    let mut quoted = false;

    for c in text.chars() {
        match c {
            '"' if depth > 0 => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes && depth == 0 => {
                if !current.is_empty() || quoted {
                    words.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        words.push(current);
    }
    words
}

/// Comma-separated call arguments, trimmed, quotes removed.
pub fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => args.push(unquote(&current)),
            _ => current.push(c),
        }
        if c == ',' && !in_quotes && depth == 0 {
            current.clear();
        }
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(unquote(&current));
    }
    args
}

fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<Statement> {
        parse_source(Path::new("/t/test.pro"), text).unwrap()
    }

    #[test]
    fn test_assignment_with_continuation() {
        let statements = parse("SOURCES += main.cpp \\\n    widget.cpp # trailing\n");
        assert_eq!(
            statements,
            vec![Statement::Assign {
                line: 1,
                name: "SOURCES".into(),
                op: AssignOp::Append,
                values: vec!["main.cpp".into(), "widget.cpp".into()],
            }]
        );
    }

    #[test]
    fn test_operators() {
        let statements = parse("A = 1\nB -= 2\nC *= 3\nD ~= s/x/y/\n");
        let ops: Vec<AssignOp> = statements
            .iter()
            .map(|s| match s {
                Statement::Assign { op, .. } => *op,
                _ => panic!("expected assignment"),
            })
            .collect();
        assert_eq!(ops, vec![AssignOp::Set, AssignOp::Remove, AssignOp::AppendUnique, AssignOp::Replace]);
    }

    #[test]
    fn test_scope_with_else() {
        let statements = parse("win32 {\n  SOURCES += win.cpp\n} else {\n  SOURCES += unix.cpp\n}\n");
        match &statements[0] {
            Statement::Scope { then, otherwise, .. } => {
                assert_eq!(then.len(), 1);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_line_conditions() {
        let statements = parse("unix:!macx: LIBS += -lfoo\nelse: LIBS += -lbar\n");
        assert_eq!(statements.len(), 1);
        match &statements[0] {
            Statement::Scope { condition, then, otherwise, .. } => {
                assert!(matches!(condition, Condition::And(_, _)));
                assert_eq!(then.len(), 1);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inline_block_and_braced_variable() {
        let statements = parse("debug { TARGET = $${TARGET}_d }\n");
        match &statements[0] {
            Statement::Scope { then, .. } => assert_eq!(
                then[0],
                Statement::Assign {
                    line: 1,
                    name: "TARGET".into(),
                    op: AssignOp::Set,
                    values: vec!["$${TARGET}_d".into()],
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_include_call_and_condition_args() {
        let statements = parse("include(../common.pri)\ncontains(QT, gui): QT += widgets\n");
        assert_eq!(
            statements[0],
            Statement::Call {
                line: 1,
                name: "include".into(),
                args: vec!["../common.pri".into()],
            }
        );
        match &statements[1] {
            Statement::Scope { condition: Condition::Test { name, args, .. }, .. } => {
                assert_eq!(name, "contains");
                assert_eq!(args.as_deref(), Some(&["QT".to_string(), "gui".to_string()][..]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_quoted_values_keep_spaces() {
        assert_eq!(split_words(r#"a "b c" $$join(X, " ")"#), vec!["a", "b c", "$$join(X, \" \")"]);
    }

    #[test]
    fn test_unbalanced_braces_fail() {
        assert!(parse_source(Path::new("/t/x.pro"), "win32 {\nA = 1\n").is_err());
        assert!(parse_source(Path::new("/t/x.pro"), "}\n").is_err());
        assert!(parse_source(Path::new("/t/x.pro"), "A = $$f(\n").is_err());
    }
}

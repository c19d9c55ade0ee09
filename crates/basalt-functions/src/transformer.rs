//! Code transformer.
//!
//! Turns caller-submitted JavaScript into a wrapped unit with one calling
//! convention. The wrapped unit is a single async function expression:
//!
//! ```text
//! (async function (__basalt, __basaltModule, __basaltExports) {
//!   <submitted source>
//!   <entry-point resolution>
//! })
//! ```
//!
//! `__basalt` is supplied by the sandbox harness and carries the request view,
//! the response builder, and the entry-point helpers. `module` and `exports`
//! are globals of the sandbox context, so submitted code may declare its own
//! bindings with those names; resolution reads the reserved parameters. Entry points are found
//! with a two-pass heuristic; the first match wins:
//!
//! 1. **Bare name**: the last non-blank line is a bare identifier. That
//!    identifier is invoked with the request view.
//! 2. **General**: module-style exports (`module.exports.default`, then
//!    `module.exports` itself), then a deferred re-check of a trailing
//!    identifier, then every top-level declaration found by a source scan,
//!    probed in declaration order.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid regex"));

static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\(")
        .expect("valid regex")
});

static BINDING_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=").expect("valid regex")
});

/// Names that can never be an entry point.
const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "undefined", "var", "void", "while", "with", "yield",
    "async", "arguments", "eval", "module", "exports", "require", "__basalt",
];

/// How the wrapper locates the function to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryPointStrategy {
    /// The trailing bare identifier names the entry point.
    BareName { identifier: String },
    /// Exports first, then the optional trailing-identifier hint, then the
    /// scanned declaration candidates.
    General {
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
        candidates: Vec<String>,
    },
}

impl EntryPointStrategy {
    /// Short label used in logs and tool output.
    pub fn label(&self) -> &'static str {
        match self {
            EntryPointStrategy::BareName { .. } => "bare-name",
            EntryPointStrategy::General { .. } => "general",
        }
    }
}

/// Output of a transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedSource {
    /// Directly executable wrapped unit.
    pub wrapped: String,
    /// Entry-point convention chosen for this source.
    pub strategy: EntryPointStrategy,
}

/// Stateless source-to-wrapper transformer.
#[derive(Debug, Clone, Default)]
pub struct CodeTransformer;

impl CodeTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Wrap `source` into an executable unit.
    ///
    /// Never executes anything. Callers validate emptiness and size first.
    pub fn transform(&self, source: &str) -> TransformedSource {
        let normalized = normalize_exports(source.trim());
        let (body, trailing) = split_trailing_identifier(&normalized);

        match trailing {
            Some(TrailingIdentifier::Bare(identifier)) => TransformedSource {
                wrapped: wrap_bare_name(body, &identifier),
                strategy: EntryPointStrategy::BareName { identifier },
            },
            Some(TrailingIdentifier::Terminated(hint)) => {
                let candidates = scan_declarations(body);
                TransformedSource {
                    wrapped: wrap_general(body, Some(&hint), &candidates),
                    strategy: EntryPointStrategy::General {
                        hint: Some(hint),
                        candidates,
                    },
                }
            }
            None => {
                let candidates = scan_declarations(body);
                TransformedSource {
                    wrapped: wrap_general(body, None, &candidates),
                    strategy: EntryPointStrategy::General {
                        hint: None,
                        candidates,
                    },
                }
            }
        }
    }
}

enum TrailingIdentifier {
    /// `name` with nothing else on the line.
    Bare(String),
    /// `name;` – only picked up by the deferred re-check.
    Terminated(String),
}

/// Split off a trailing identifier line.
///
/// The identifier line itself is dropped from the executed body: evaluating a
/// bare identifier has no effect other than throwing when it is undeclared,
/// and the wrapper reports that case as a typed error instead.
fn split_trailing_identifier(source: &str) -> (&str, Option<TrailingIdentifier>) {
    let trimmed = source.trim_end();
    let (head, last_line) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };
    let last_line = last_line.trim();

    if is_entry_identifier(last_line) {
        return (head, Some(TrailingIdentifier::Bare(last_line.to_string())));
    }
    if let Some(name) = last_line.strip_suffix(';').map(str::trim_end) {
        if is_entry_identifier(name) {
            return (head, Some(TrailingIdentifier::Terminated(name.to_string())));
        }
    }
    (trimmed, None)
}

fn is_entry_identifier(candidate: &str) -> bool {
    IDENTIFIER.is_match(candidate) && !RESERVED.contains(&candidate)
}

/// Rewrite ES module export syntax into the CommonJS-style container the
/// wrapper provides. `export default` targets the reserved module parameter.
fn normalize_exports(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 32);
    for (i, line) in source.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let indent_len = line.len() - line.trim_start().len();
        let (indent, rest) = line.split_at(indent_len);
        if let Some(value) = rest.strip_prefix("export default ") {
            out.push_str(indent);
            out.push_str("__basaltModule.exports.default = ");
            out.push_str(value);
        } else if let Some(decl) = rest.strip_prefix("export ") {
            let keeps_meaning = ["function", "async ", "const ", "let ", "var ", "class "]
                .iter()
                .any(|kw| decl.starts_with(kw));
            out.push_str(indent);
            out.push_str(if keeps_meaning { decl } else { rest });
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Collect names of top-level `function`/`const`/`let`/`var` declarations,
/// in declaration order, without duplicates or reserved names.
pub fn scan_declarations(source: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for line in top_level_lines(source) {
        let line = line.trim_start();
        let captured = FUNCTION_DECL
            .captures(line)
            .or_else(|| BINDING_DECL.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());

        if let Some(name) = captured {
            if !RESERVED.contains(&name) && seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Lines that start at brace depth zero.
///
/// A light lexer skips string literals, template literals, regular expression
/// literals and comments so braces inside them do not shift the depth.
fn top_level_lines(source: &str) -> Vec<&str> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Quoted(char),
        Regex { in_class: bool },
    }

    let mut lines = Vec::new();
    let mut depth: i32 = 0;
    let mut state = State::Code;
    // Last significant character of code and the identifier ending there.
    let mut prev: Option<char> = None;
    let mut word = String::new();
    let mut gap = false;

    for line in source.lines() {
        if depth == 0 && state == State::Code {
            lines.push(line);
        }

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match state {
                State::Code => {
                    if c.is_whitespace() {
                        gap = true;
                        continue;
                    }
                    match c {
                        '/' if chars.peek() == Some(&'/') => {
                            state = State::LineComment;
                            continue;
                        }
                        '/' if chars.peek() == Some(&'*') => {
                            chars.next();
                            state = State::BlockComment;
                            continue;
                        }
                        '/' if starts_regex(prev, &word) => {
                            state = State::Regex { in_class: false };
                        }
                        '\'' | '"' | '`' => state = State::Quoted(c),
                        '{' => depth += 1,
                        '}' => depth = (depth - 1).max(0),
                        _ => {}
                    }
                    if is_word_char(c) {
                        if gap || !prev.is_some_and(is_word_char) {
                            word.clear();
                        }
                        word.push(c);
                    } else {
                        word.clear();
                    }
                    prev = Some(c);
                    gap = false;
                }
                State::LineComment => break,
                State::BlockComment => {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        state = State::Code;
                    }
                }
                State::Quoted(quote) => {
                    if c == '\\' {
                        chars.next();
                    } else if c == quote {
                        state = State::Code;
                    }
                }
                State::Regex { in_class } => match c {
                    '\\' => {
                        chars.next();
                    }
                    '[' => state = State::Regex { in_class: true },
                    ']' => state = State::Regex { in_class: false },
                    '/' if !in_class => {
                        state = State::Code;
                        // A closed literal is an operand, so a following `/` divides.
                        prev = Some(')');
                    }
                    _ => {}
                },
            }
        }

        gap = true;
        // Line comments, regex literals and single/double quoted strings end
        // with the line.
        match state {
            State::LineComment | State::Regex { .. } => state = State::Code,
            State::Quoted(q) if q != '`' => state = State::Code,
            _ => {}
        }
    }
    lines
}

/// Whether a `/` in code position opens a regular expression literal rather
/// than dividing, judged from the significant character before it.
fn starts_regex(prev: Option<char>, word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
        "do", "else", "yield", "await",
    ];
    match prev {
        None => true,
        Some(c) if is_word_char(c) => KEYWORDS.contains(&word),
        Some(c) => "(,=:[!&|?{};+-*%<>~^".contains(c),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn wrap_bare_name(body: &str, identifier: &str) -> String {
    format!(
        r#"(async function (__basalt, __basaltModule, __basaltExports) {{
{body}
;
if (typeof {id} !== "function") {{
  throw __basalt.entryError("EntryPointNotCallable", "{id}", typeof {id});
}}
return await {id}(__basalt.request, __basalt.response);
}})"#,
        body = body,
        id = identifier,
    )
}

fn wrap_general(body: &str, hint: Option<&str>, candidates: &[String]) -> String {
    let mut probes = String::new();
    let names = hint
        .into_iter()
        .chain(candidates.iter().map(String::as_str).filter(|c| Some(*c) != hint));
    for name in names {
        probes.push_str(&format!(
            "  [\"{name}\", () => (typeof {name} === \"function\" ? {name} : typeof {name})],\n"
        ));
    }

    format!(
        r#"(async function (__basalt, __basaltModule, __basaltExports) {{
{body}
;
const __basaltEntry = __basalt.resolveEntry(__basaltModule, __basaltExports, [
{probes}]);
return await __basaltEntry(__basalt.request, __basalt.response);
}})"#,
        body = body,
        probes = probes,
    )
}

//! Heuristic acceptance gate for generated file content.
//!
//! Checks token presence only. Nothing is parsed or compiled.

use std::fmt;

use crate::blueprint::{FileCategory, PlannedFile};
use crate::gateway::ProviderError;
use crate::templates::fallback_content;

/// Normalized content shorter than this is rejected.
pub const MIN_CONTENT_CHARS: usize = 40;

/// Case-sensitive markers of unfinished output, matched as whole words.
const UPPERCASE_MARKERS: &[&str] = &["TODO", "FIXME", "NOT IMPLEMENTED"];

/// Markers matched case-insensitively.
const PHRASE_MARKERS: &[&str] = &[
    "// ...",
    "/* ... */",
    "rest of the code",
    "your code here",
    "implement me",
];

const EXPORT: &[&str] = &["export"];

/// One required-token rule: at least one alternative must appear.
#[derive(Debug, Clone, Copy)]
struct Rule {
    label: &'static str,
    any_of: &'static [&'static str],
}

const fn rule(label: &'static str, any_of: &'static [&'static str]) -> Rule {
    Rule { label, any_of }
}

fn rules_for(category: FileCategory) -> &'static [Rule] {
    const CONTROLLER: &[Rule] = &[
        rule("export", EXPORT),
        rule("async", &["async"]),
        rule("error handling", &["catch", "next("]),
    ];
    const MODEL: &[Rule] = &[
        rule("schema", &["Schema(", ".define(", "DataTypes", "model("]),
        rule("export", EXPORT),
    ];
    const ROUTE: &[Rule] = &[
        rule("router", &["Router(", "router"]),
        rule(
            "route registration",
            &[".get(", ".post(", ".put(", ".patch(", ".delete(", ".use("],
        ),
    ];
    const COMPONENT: &[Rule] = &[
        rule("export", EXPORT),
        rule("render", &["return", "=>"]),
        rule("jsx", &["</", "/>"]),
    ];
    const STORE: &[Rule] = &[
        rule(
            "store",
            &[
                "create(",
                "createSlice",
                "createStore",
                "configureStore",
                "createContext",
                "useReducer",
            ],
        ),
        rule("export", EXPORT),
    ];
    const API_CLIENT: &[Rule] = &[rule("http", &["axios", "fetch("]), rule("export", EXPORT)];
    const MANIFEST: &[Rule] = &[
        rule("name", &["\"name\""]),
        rule("dependencies or scripts", &["\"dependencies\"", "\"scripts\""]),
    ];
    const EXPORT_ONLY: &[Rule] = &[rule("export", EXPORT)];

    match category {
        FileCategory::Controller => CONTROLLER,
        FileCategory::Model => MODEL,
        FileCategory::Route => ROUTE,
        FileCategory::Component => COMPONENT,
        FileCategory::Store => STORE,
        FileCategory::ApiClient => API_CLIENT,
        FileCategory::Manifest => MANIFEST,
        FileCategory::Hook | FileCategory::Page => EXPORT_ONLY,
        FileCategory::Service
        | FileCategory::Middleware
        | FileCategory::Entry
        | FileCategory::Entrypoint
        | FileCategory::Config
        | FileCategory::EnvFile
        | FileCategory::Style
        | FileCategory::Other => &[],
    }
}

/// Why content was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ModelError(String),
    Empty,
    TooShort(usize),
    UnfinishedMarker(&'static str),
    MissingToken(&'static str),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ModelError(e) => write!(f, "model error: {e}"),
            Rejection::Empty => f.write_str("empty output"),
            Rejection::TooShort(n) => {
                write!(f, "too short: {n} chars (min {MIN_CONTENT_CHARS})")
            }
            Rejection::UnfinishedMarker(m) => write!(f, "unfinished-work marker {m:?}"),
            Rejection::MissingToken(label) => write!(f, "missing {label} marker"),
        }
    }
}

/// Final content for one path.
#[derive(Debug, Clone)]
pub struct Validated {
    pub content: String,
    pub accepted: bool,
    pub rejection: Option<Rejection>,
}

/// Keep the body of the first fenced block (or the whole reply when there is
/// none), trim, and end with one newline.
pub fn normalize(raw: &str) -> String {
    let text = first_fenced_block(raw).unwrap_or(raw);
    finish(strip_closing_fence(text))
}

/// Like [`normalize`], but only a fence wrapping the whole reply is removed.
/// Markdown documents keep their own fenced examples.
pub fn normalize_document(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(i) => &text[i + 1..],
            None => "",
        };
    }
    finish(strip_closing_fence(text))
}

fn first_fenced_block(text: &str) -> Option<&str> {
    let mut body_start = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_end = offset + line.len();
        if line.trim_start().starts_with("```") {
            match body_start {
                None => body_start = Some(line_end),
                Some(start) => return Some(&text[start..offset]),
            }
        }
        offset = line_end;
    }
    // Unclosed fence: the body runs to the end.
    body_start.map(|start| &text[start..])
}

fn strip_closing_fence(text: &str) -> &str {
    let trimmed = text.trim_end();
    trimmed.strip_suffix("```").unwrap_or(trimmed)
}

fn finish(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    let mut out = text.to_string();
    out.push('\n');
    out
}

/// `marker` standing alone, not glued into an identifier like `ADD_TODO`.
fn has_marker(content: &str, marker: &str) -> bool {
    let joins = |c: char| c.is_alphanumeric() || c == '_';
    content.match_indices(marker).any(|(at, _)| {
        let before = content[..at].chars().next_back();
        let after = content[at + marker.len()..].chars().next();
        !before.is_some_and(joins) && !after.is_some_and(joins)
    })
}

/// Run all checks on already-normalized content.
pub fn check(category: FileCategory, content: &str) -> Result<(), Rejection> {
    if content.trim().is_empty() {
        return Err(Rejection::Empty);
    }

    let len = content.chars().count();
    if len < MIN_CONTENT_CHARS {
        return Err(Rejection::TooShort(len));
    }

    if let Some(m) = UPPERCASE_MARKERS.iter().find(|m| has_marker(content, m)) {
        return Err(Rejection::UnfinishedMarker(*m));
    }
    let lower = content.to_lowercase();
    if let Some(m) = PHRASE_MARKERS.iter().find(|m| lower.contains(**m)) {
        return Err(Rejection::UnfinishedMarker(*m));
    }

    for r in rules_for(category) {
        if !r.any_of.iter().any(|tok| content.contains(tok)) {
            return Err(Rejection::MissingToken(r.label));
        }
    }

    Ok(())
}

/// Accept the model's output for `file` or replace it with the category
/// fallback.
pub fn validate(file: &PlannedFile, output: Result<String, ProviderError>) -> Validated {
    let outcome = match output {
        Ok(raw) => {
            let content = if file.path.ends_with(".md") {
                normalize_document(&raw)
            } else {
                normalize(&raw)
            };
            check(file.category, &content).map(|()| content)
        }
        Err(e) => Err(Rejection::ModelError(e.to_string())),
    };

    match outcome {
        Ok(content) => Validated {
            content,
            accepted: true,
            rejection: None,
        },
        Err(rejection) => Validated {
            content: fallback_content(file.tier, file.category, &file.path),
            accepted: false,
            rejection: Some(rejection),
        },
    }
}

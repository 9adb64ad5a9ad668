//! Blueprint: the planned file manifest for one generation task.
//!
//! A blueprint is built once per task and never mutated. Every declared path
//! is resolved to a [`FileCategory`] at build time so later stages (ordering,
//! validation, fallback templates) never re-derive it from the path.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{parse_embedded, ExtractError};

// =============================================================================
// Tier & category
// =============================================================================

/// Half of the application a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Backend,
    Frontend,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Backend, Tier::Frontend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Backend => "backend",
            Tier::Frontend => "frontend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backend" => Some(Tier::Backend),
            "frontend" => Some(Tier::Frontend),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of file kinds, resolved from a path once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Manifest,
    Config,
    EnvFile,
    Model,
    Controller,
    Service,
    Route,
    Middleware,
    Entrypoint,
    ApiClient,
    Store,
    Hook,
    Component,
    Page,
    Entry,
    Style,
    Other,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Manifest => "manifest",
            FileCategory::Config => "config",
            FileCategory::EnvFile => "env_file",
            FileCategory::Model => "model",
            FileCategory::Controller => "controller",
            FileCategory::Service => "service",
            FileCategory::Route => "route",
            FileCategory::Middleware => "middleware",
            FileCategory::Entrypoint => "entrypoint",
            FileCategory::ApiClient => "api_client",
            FileCategory::Store => "store",
            FileCategory::Hook => "hook",
            FileCategory::Component => "component",
            FileCategory::Page => "page",
            FileCategory::Entry => "entry",
            FileCategory::Style => "style",
            FileCategory::Other => "other",
        }
    }

    /// Resolve the category of `path` within `tier`.
    pub fn classify(tier: Tier, path: &str) -> Self {
        let path = path.replace('\\', "/");
        let lower = path.to_ascii_lowercase();
        let file_name = lower.rsplit('/').next().unwrap_or(&lower);
        let dirs: Vec<&str> = lower.split('/').rev().skip(1).collect();
        let in_dir = |names: &[&str]| dirs.iter().any(|d| names.contains(d));

        if file_name == "package.json" {
            return FileCategory::Manifest;
        }
        if file_name == ".env" || file_name.starts_with(".env.") || file_name.ends_with(".env") {
            return FileCategory::EnvFile;
        }
        if file_name.ends_with(".css") || file_name.ends_with(".scss") {
            return FileCategory::Style;
        }
        if file_name.contains(".config.") || in_dir(&["config"]) {
            return FileCategory::Config;
        }

        match tier {
            Tier::Backend => {
                if in_dir(&["models", "schemas"]) || file_name.contains(".model.") {
                    FileCategory::Model
                } else if in_dir(&["controllers"]) || file_name.contains(".controller.") {
                    FileCategory::Controller
                } else if in_dir(&["services"]) || file_name.contains(".service.") {
                    FileCategory::Service
                } else if in_dir(&["routes", "api"]) || file_name.contains(".routes.") {
                    FileCategory::Route
                } else if in_dir(&["middleware", "middlewares"]) {
                    FileCategory::Middleware
                } else if dirs.iter().all(|d| *d == "src")
                    && matches!(
                        file_name,
                        "server.js" | "app.js" | "index.js" | "server.ts" | "app.ts" | "index.ts"
                    )
                {
                    FileCategory::Entrypoint
                } else {
                    FileCategory::Other
                }
            }
            Tier::Frontend => {
                let stem = file_name.split('.').next().unwrap_or("");
                let original_stem = path
                    .rsplit('/')
                    .next()
                    .and_then(|n| n.split('.').next())
                    .unwrap_or("");
                if in_dir(&["api", "services"]) || stem == "api" || stem == "client" {
                    FileCategory::ApiClient
                } else if in_dir(&["store", "stores", "context", "contexts", "slices", "redux"]) {
                    FileCategory::Store
                } else if in_dir(&["hooks"]) || is_hook_name(original_stem) {
                    FileCategory::Hook
                } else if in_dir(&["pages", "views"]) {
                    FileCategory::Page
                } else if in_dir(&["components"]) || stem == "app" {
                    FileCategory::Component
                } else if matches!(stem, "main" | "index") {
                    FileCategory::Entry
                } else {
                    FileCategory::Other
                }
            }
        }
    }

    /// Purpose used when the planner left one blank.
    pub fn default_purpose(&self, resource: &str) -> String {
        match self {
            FileCategory::Manifest => "Package manifest with dependencies and scripts".into(),
            FileCategory::Config => "Configuration".into(),
            FileCategory::EnvFile => "Example environment variables".into(),
            FileCategory::Model => format!("Data model for {resource}"),
            FileCategory::Controller => format!("Request handlers for {resource}"),
            FileCategory::Service => format!("Business logic for {resource}"),
            FileCategory::Route => format!("HTTP routes for {resource}"),
            FileCategory::Middleware => format!("Request middleware: {resource}"),
            FileCategory::Entrypoint => "Server entrypoint wiring middleware and routes".into(),
            FileCategory::ApiClient => "HTTP client for the backend API".into(),
            FileCategory::Store => format!("Client state for {resource}"),
            FileCategory::Hook => format!("Reusable hook {resource}"),
            FileCategory::Component => format!("UI component {resource}"),
            FileCategory::Page => format!("Page view {resource}"),
            FileCategory::Entry => "Client entrypoint that mounts the app".into(),
            FileCategory::Style => "Stylesheet".into(),
            FileCategory::Other => format!("Supporting file {resource}"),
        }
    }
}

fn is_hook_name(stem: &str) -> bool {
    stem.starts_with("use")
        && stem[3..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
}

/// File stem, used as the resource name in prompts and templates.
pub fn resource_name(path: &str) -> &str {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    if stem.is_empty() {
        file_name
    } else {
        stem
    }
}

// =============================================================================
// Document
// =============================================================================

/// Blueprint as serialized to `blueprint.json` and embedded into prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueprintDocument {
    pub project_name: String,
    pub project_type: String,
    pub core_entities: Vec<String>,
    pub backend: IndexMap<String, String>,
    pub frontend: IndexMap<String, String>,
}

/// Lenient shape of planner output. Purposes may come back as non-strings.
#[derive(Debug, Default, Deserialize)]
struct RawBlueprint {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    project_type: Option<String>,
    #[serde(default)]
    core_entities: Vec<Value>,
    #[serde(default)]
    backend: IndexMap<String, Value>,
    #[serde(default)]
    frontend: IndexMap<String, Value>,
}

/// One path the generator must materialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    pub tier: Tier,
    pub path: String,
    pub purpose: String,
    pub category: FileCategory,
}

#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("blueprint declares no usable paths")]
    Empty,
}

/// Immutable, validated blueprint.
#[derive(Debug, Clone)]
pub struct Blueprint {
    document: BlueprintDocument,
    files: Vec<PlannedFile>,
}

impl Blueprint {
    /// Parse planner output, tolerating prose around the JSON object.
    pub fn parse(raw: &str) -> Result<Self, BlueprintError> {
        let raw: RawBlueprint = parse_embedded(raw)?;
        Self::from_raw(raw)
    }

    /// Build from an already-typed document, applying the same path and
    /// purpose rules as [`Blueprint::parse`].
    pub fn from_document(doc: BlueprintDocument) -> Result<Self, BlueprintError> {
        let raw = RawBlueprint {
            project_name: Some(doc.project_name),
            project_type: Some(doc.project_type),
            core_entities: doc.core_entities.into_iter().map(Value::String).collect(),
            backend: doc
                .backend
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
            frontend: doc
                .frontend
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawBlueprint) -> Result<Self, BlueprintError> {
        let mut files = Vec::new();
        let backend = resolve_tier(Tier::Backend, raw.backend, &mut files);
        let frontend = resolve_tier(Tier::Frontend, raw.frontend, &mut files);

        if files.is_empty() {
            return Err(BlueprintError::Empty);
        }

        let core_entities = raw
            .core_entities
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Object(map) => map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let document = BlueprintDocument {
            project_name: non_blank(raw.project_name).unwrap_or_else(|| "generated-app".into()),
            project_type: non_blank(raw.project_type).unwrap_or_else(|| "web application".into()),
            core_entities,
            backend,
            frontend,
        };

        Ok(Self { document, files })
    }

    /// Fixed minimal blueprint used when planning fails.
    pub fn fallback(request: &str) -> Self {
        let backend: IndexMap<String, String> = [
            ("package.json", "Backend manifest with express and mongoose"),
            ("models/Item.js", "Mongoose model for items"),
            ("routes/items.js", "CRUD routes for items"),
            ("server.js", "Express server entrypoint"),
            (".env.example", "Example environment variables"),
        ]
        .into_iter()
        .map(|(p, d)| (p.to_string(), d.to_string()))
        .collect();

        let frontend: IndexMap<String, String> = [
            ("package.json", "Frontend manifest with react and vite"),
            ("src/api/client.js", "Axios client for the items API"),
            ("src/App.jsx", "Root component listing items"),
            ("src/main.jsx", "Client entrypoint"),
        ]
        .into_iter()
        .map(|(p, d)| (p.to_string(), d.to_string()))
        .collect();

        let files = backend
            .iter()
            .map(|(p, d)| (Tier::Backend, p, d))
            .chain(frontend.iter().map(|(p, d)| (Tier::Frontend, p, d)))
            .map(|(tier, path, purpose)| PlannedFile {
                tier,
                path: path.clone(),
                purpose: purpose.clone(),
                category: FileCategory::classify(tier, path),
            })
            .collect();

        let project_type = if request.trim().is_empty() {
            "web application".to_string()
        } else {
            let summary: String = request.trim().chars().take(80).collect();
            format!("web application: {summary}")
        };

        Self {
            document: BlueprintDocument {
                project_name: "fallback-app".into(),
                project_type,
                core_entities: vec!["Item".into()],
                backend,
                frontend,
            },
            files,
        }
    }

    pub fn document(&self) -> &BlueprintDocument {
        &self.document
    }

    /// All planned files, backend first, in declaration order.
    pub fn files(&self) -> &[PlannedFile] {
        &self.files
    }

    pub fn tier_files(&self, tier: Tier) -> impl Iterator<Item = &PlannedFile> + '_ {
        self.files.iter().filter(move |f| f.tier == tier)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.document).unwrap_or_else(|_| "{}".into())
    }

    /// Fraction of structural checks this blueprint passes.
    pub fn structural_quality(&self) -> f64 {
        let has_manifest = |tier: Tier| {
            self.tier_files(tier)
                .any(|f| f.category == FileCategory::Manifest)
        };
        let checks = [
            self.tier_files(Tier::Backend).next().is_some(),
            self.tier_files(Tier::Frontend).next().is_some(),
            !self.document.core_entities.is_empty(),
            has_manifest(Tier::Backend),
            has_manifest(Tier::Frontend),
        ];
        let passed = checks.iter().filter(|c| **c).count();
        passed as f64 / checks.len() as f64
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Validate one tier's paths, record them as planned files, and return the
/// cleaned `path -> purpose` map.
fn resolve_tier(
    tier: Tier,
    raw: IndexMap<String, Value>,
    files: &mut Vec<PlannedFile>,
) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for (path, purpose) in raw {
        let path = path.trim().trim_start_matches("./").replace('\\', "/");
        if !is_safe_relative_path(&path) {
            tracing::warn!(tier = %tier, path = %path, "dropping unsafe blueprint path");
            continue;
        }
        if out.contains_key(&path) {
            continue;
        }

        let category = FileCategory::classify(tier, &path);
        let purpose = match purpose {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Null | Value::String(_) => category.default_purpose(resource_name(&path)),
            other => other.to_string(),
        };

        files.push(PlannedFile {
            tier,
            path: path.clone(),
            purpose: purpose.clone(),
            category,
        });
        out.insert(path, purpose);
    }
    out
}

fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    // Windows drive prefixes
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return false;
    }
    !path.split('/').any(|seg| seg == ".." || seg.is_empty())
}

//! Prompt templates for planning, per-file synthesis and critique.
//!
//! Rendering only. No model calls happen here.

use crate::blueprint::{Blueprint, FileCategory, PlannedFile, Tier};
use crate::gateway::Message;

// =============================================================================
// Prompt instance
// =============================================================================

/// Rendered prompt ready for the model.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// =============================================================================
// Planner
// =============================================================================

const PLANNER_SYSTEM: &str = r#"You are a senior full-stack architect. You turn a short application request into a file manifest for a MERN project (MongoDB, Express, React, Node).

Output only a single JSON object with exactly these keys:
{
  "project_name": "kebab-case name",
  "project_type": "one-line description",
  "core_entities": ["Entity", ...],
  "backend": {"relative/path.js": "purpose of the file", ...},
  "frontend": {"relative/path.jsx": "purpose of the file", ...}
}

Rules:
- Paths are relative to the tier root. No absolute paths, no "..".
- Every path maps to a non-empty purpose.
- Include a package.json in both tiers.
- Backend: models, controllers, routes, server entrypoint, .env.example.
- Frontend: api client, state store, components, pages, App.jsx, main.jsx.
- List files in dependency order: files that others import come first."#;

pub fn planner_prompt(request: &str) -> PromptInstance {
    PromptInstance {
        template_slug: "planner_v1".into(),
        system: PLANNER_SYSTEM.to_string(),
        user: format!(
            "<request>\n{}\n</request>\n\nReturn the blueprint JSON.\njson:",
            escape_xml_chars(request.trim())
        ),
    }
}

// =============================================================================
// Per-file synthesis
// =============================================================================

const FILE_SYSTEM: &str = "You are an expert MERN developer. You write one complete, production-ready file at a time for a project described by a blueprint. \
Output only the file content. No explanations, no markdown fences. \
Never leave placeholders, TODOs or elided sections: every function is fully implemented. \
Import only files that exist in the blueprint, using paths relative to the file you are writing.";

fn backend_guidance(category: FileCategory) -> &'static str {
    match category {
        FileCategory::Controller => {
            "Export async handler functions. Wrap each body in try/catch and pass errors to next(err) or respond with a status code. Use the model from models/."
        }
        FileCategory::Model => {
            "Define a mongoose Schema with field types, required flags and timestamps, then export the compiled model."
        }
        FileCategory::Route => {
            "Create an express.Router(), register the CRUD endpoints with router.get/post/put/delete, wire them to the controller handlers, and export the router."
        }
        FileCategory::Entrypoint => {
            "Load dotenv, create the express app, apply cors and express.json(), connect mongoose using MONGODB_URI, mount every router under /api, and listen on PORT."
        }
        FileCategory::Middleware => {
            "Export a middleware function (req, res, next) that always calls next() or ends the response."
        }
        FileCategory::Manifest => {
            "Valid JSON package manifest with name, scripts (start, dev) and dependencies for express, mongoose, cors and dotenv."
        }
        FileCategory::EnvFile => "KEY=value lines with safe example values. No real secrets.",
        _ => "Follow the conventions of the rest of the backend.",
    }
}

fn frontend_guidance(category: FileCategory) -> &'static str {
    match category {
        FileCategory::Component => {
            "Export a React function component that returns JSX. Use hooks for state and effects, and call the API through the api client module."
        }
        FileCategory::Page => {
            "Export a React page component composed from the components in the blueprint."
        }
        FileCategory::Store => {
            "Create the store (zustand create() or a React context with useReducer) holding entity state and async actions, and export it."
        }
        FileCategory::ApiClient => {
            "Create an axios instance with baseURL from import.meta.env.VITE_API_URL (default /api) and export one function per backend endpoint."
        }
        FileCategory::Hook => "Export a custom hook whose name starts with use.",
        FileCategory::Entry => {
            "Mount <App /> into #root with ReactDOM.createRoot inside React.StrictMode."
        }
        FileCategory::Manifest => {
            "Valid JSON package manifest with name, scripts (dev, build, preview) and dependencies for react, react-dom and axios, plus vite devDependencies."
        }
        _ => "Follow the conventions of the rest of the frontend.",
    }
}

pub fn file_prompt(blueprint: &Blueprint, file: &PlannedFile) -> PromptInstance {
    let guidance = match file.tier {
        Tier::Backend => backend_guidance(file.category),
        Tier::Frontend => frontend_guidance(file.category),
    };

    let user = format!(
        "<blueprint>\n{}\n</blueprint>\n\n\
         <target tier=\"{}\" category=\"{}\">\n{}\n</target>\n\n\
         <purpose>\n{}\n</purpose>\n\n\
         <guidance>\n{}\n</guidance>\n\n\
         Write the complete content of {}.",
        escape_xml_chars(&blueprint.to_json_pretty()),
        file.tier,
        file.category.as_str(),
        escape_xml_chars(&file.path),
        escape_xml_chars(&file.purpose),
        guidance,
        escape_xml_chars(&file.path),
    );

    PromptInstance {
        template_slug: format!("file_{}_v1", file.tier),
        system: FILE_SYSTEM.to_string(),
        user,
    }
}

// =============================================================================
// Critique
// =============================================================================

const CRITIQUE_SYSTEM: &str = r#"You review how well the files of a generated MERN application fit together: imports resolve, routes match the api client, models match the entities, state flows from store to components.

Output only JSON:
{
  "weaving_score": 1-10,
  "interconnectivity_analysis": "short paragraph",
  "critical_issues": ["..."],
  "refinements": [{"file": "tier/path", "suggestion": "..."}]
}"#;

pub fn critique_prompt(blueprint: &Blueprint, generated_paths: &[String]) -> PromptInstance {
    let listing = generated_paths
        .iter()
        .map(|p| format!("- {}", escape_xml_chars(p)))
        .collect::<Vec<_>>()
        .join("\n");

    PromptInstance {
        template_slug: "critique_v1".into(),
        system: CRITIQUE_SYSTEM.to_string(),
        user: format!(
            "<blueprint>\n{}\n</blueprint>\n\n<generated_files>\n{}\n</generated_files>\n\nReturn the review JSON.\njson:",
            escape_xml_chars(&blueprint.to_json_pretty()),
            listing
        ),
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Deterministic fallback content per file category.
//!
//! Used whenever the model's output for a path is rejected. Output depends
//! only on tier, category and path, and always passes the validator for its
//! own category.

use crate::blueprint::{resource_name, FileCategory, Tier};

/// Names derived from a path stem, e.g. `routes/tasks.js` gives
/// `Task` / `task` / `tasks`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Names {
    stem: String,
    entity: String,
    var: String,
    plural: String,
}

impl Names {
    fn from_path(path: &str) -> Self {
        let stem: String = resource_name(path)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let stem = if stem.is_empty() { "item".to_string() } else { stem };

        let base = ["Controller", "controller", "Routes", "routes", "Service", "service", "Store", "store"]
            .iter()
            .find_map(|suffix| stem.strip_suffix(suffix).filter(|b| !b.is_empty()))
            .unwrap_or(stem.as_str());
        let base = match base.strip_prefix("use") {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_uppercase()) => rest,
            _ => base,
        };

        let singular = if base.len() > 3 && base.ends_with('s') && !base.ends_with("ss") {
            &base[..base.len() - 1]
        } else {
            base
        };

        let mut chars = singular.chars();
        let entity = match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => "Item".to_string(),
        };
        let var = entity[..1].to_ascii_lowercase() + &entity[1..];
        let plural = format!("{var}s");

        Self {
            stem,
            entity,
            var,
            plural,
        }
    }
}

fn extension(path: &str) -> &str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(i) if i > 0 => &file_name[i + 1..],
        _ => "",
    }
}

/// Fallback content for `path`.
pub fn fallback_content(tier: Tier, category: FileCategory, path: &str) -> String {
    let n = Names::from_path(path);
    let body = match category {
        FileCategory::Manifest => manifest(tier),
        FileCategory::EnvFile => env_file(tier),
        FileCategory::Config => config(tier, path),
        FileCategory::Model => model(&n),
        FileCategory::Controller => controller(&n),
        FileCategory::Service => service(&n),
        FileCategory::Route => route(&n),
        FileCategory::Middleware => middleware(&n),
        FileCategory::Entrypoint => entrypoint(),
        FileCategory::ApiClient => api_client(&n),
        FileCategory::Store => store(&n),
        FileCategory::Hook => hook(&n),
        FileCategory::Component => component(&n),
        FileCategory::Page => page(&n),
        FileCategory::Entry => entry(path),
        FileCategory::Style => style(),
        FileCategory::Other => other(&n, path),
    };
    let mut out = body.trim().to_string();
    out.push('\n');
    out
}

// =============================================================================
// Backend
// =============================================================================

fn manifest(tier: Tier) -> String {
    match tier {
        Tier::Backend => r#"{
  "name": "generated-backend",
  "version": "1.0.0",
  "main": "server.js",
  "scripts": {
    "start": "node server.js",
    "dev": "nodemon server.js"
  },
  "dependencies": {
    "cors": "^2.8.5",
    "dotenv": "^16.4.5",
    "express": "^4.19.2",
    "mongoose": "^8.4.0"
  },
  "devDependencies": {
    "nodemon": "^3.1.0"
  }
}"#
        .to_string(),
        Tier::Frontend => r#"{
  "name": "generated-frontend",
  "version": "1.0.0",
  "private": true,
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "axios": "^1.7.2",
    "react": "^18.3.1",
    "react-dom": "^18.3.1",
    "zustand": "^4.5.2"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.1",
    "vite": "^5.3.1"
  }
}"#
        .to_string(),
    }
}

fn env_file(tier: Tier) -> String {
    match tier {
        Tier::Backend => "# Server\n\
             PORT=5000\n\
             MONGODB_URI=mongodb://localhost:27017/generated_app\n\
             JWT_SECRET=change-this-secret"
            .to_string(),
        Tier::Frontend => "# Base URL of the backend API\nVITE_API_URL=http://localhost:5000/api".to_string(),
    }
}

fn config(tier: Tier, path: &str) -> String {
    let lower = path.to_ascii_lowercase();
    if lower.contains("vite.config") {
        return r#"import { defineConfig } from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({
  plugins: [react()],
  server: {
    port: 3000,
    proxy: {
      '/api': {
        target: 'http://localhost:5000',
        changeOrigin: true,
      },
    },
  },
});"#
            .to_string();
    }
    match tier {
        Tier::Backend => r#"const mongoose = require('mongoose');

const connectDB = async () => {
  const uri = process.env.MONGODB_URI || 'mongodb://localhost:27017/generated_app';
  await mongoose.connect(uri);
  console.log('MongoDB connected');
};

module.exports = connectDB;"#
            .to_string(),
        Tier::Frontend => r#"const config = {
  apiUrl: import.meta.env.VITE_API_URL || '/api',
};

export default config;"#
            .to_string(),
    }
}

fn model(n: &Names) -> String {
    format!(
        r#"const mongoose = require('mongoose');

const {var}Schema = new mongoose.Schema(
  {{
    name: {{ type: String, required: true, trim: true }},
    description: {{ type: String, default: '' }},
    completed: {{ type: Boolean, default: false }},
  }},
  {{ timestamps: true }}
);

module.exports = mongoose.model('{entity}', {var}Schema);"#,
        var = n.var,
        entity = n.entity
    )
}

fn controller(n: &Names) -> String {
    format!(
        r#"const {entity} = require('../models/{entity}');

exports.list = async (req, res, next) => {{
  try {{
    const {plural} = await {entity}.find().sort({{ createdAt: -1 }});
    res.json({plural});
  }} catch (err) {{
    next(err);
  }}
}};

exports.get = async (req, res, next) => {{
  try {{
    const {var} = await {entity}.findById(req.params.id);
    if (!{var}) return res.status(404).json({{ message: '{entity} not found' }});
    res.json({var});
  }} catch (err) {{
    next(err);
  }}
}};

exports.create = async (req, res, next) => {{
  try {{
    const {var} = await {entity}.create(req.body);
    res.status(201).json({var});
  }} catch (err) {{
    next(err);
  }}
}};

exports.update = async (req, res, next) => {{
  try {{
    const {var} = await {entity}.findByIdAndUpdate(req.params.id, req.body, {{ new: true }});
    if (!{var}) return res.status(404).json({{ message: '{entity} not found' }});
    res.json({var});
  }} catch (err) {{
    next(err);
  }}
}};

exports.remove = async (req, res, next) => {{
  try {{
    await {entity}.findByIdAndDelete(req.params.id);
    res.status(204).end();
  }} catch (err) {{
    next(err);
  }}
}};"#,
        entity = n.entity,
        var = n.var,
        plural = n.plural
    )
}

fn service(n: &Names) -> String {
    format!(
        r#"const {entity} = require('../models/{entity}');

async function findAll(filter = {{}}) {{
  return {entity}.find(filter);
}}

async function findById(id) {{
  return {entity}.findById(id);
}}

module.exports = {{ findAll, findById }};"#,
        entity = n.entity
    )
}

fn route(n: &Names) -> String {
    format!(
        r#"const express = require('express');
const {entity} = require('../models/{entity}');

const router = express.Router();

router.get('/', async (req, res, next) => {{
  try {{
    res.json(await {entity}.find());
  }} catch (err) {{
    next(err);
  }}
}});

router.post('/', async (req, res, next) => {{
  try {{
    res.status(201).json(await {entity}.create(req.body));
  }} catch (err) {{
    next(err);
  }}
}});

router.put('/:id', async (req, res, next) => {{
  try {{
    res.json(await {entity}.findByIdAndUpdate(req.params.id, req.body, {{ new: true }}));
  }} catch (err) {{
    next(err);
  }}
}});

router.delete('/:id', async (req, res, next) => {{
  try {{
    await {entity}.findByIdAndDelete(req.params.id);
    res.status(204).end();
  }} catch (err) {{
    next(err);
  }}
}});

module.exports = router;"#,
        entity = n.entity
    )
}

fn middleware(n: &Names) -> String {
    format!(
        r#"function {var}(req, res, next) {{
  res.setHeader('X-Handled-By', '{stem}');
  next();
}}

module.exports = {var};"#,
        var = n.var,
        stem = n.stem
    )
}

fn entrypoint() -> String {
    r#"require('dotenv').config();
const express = require('express');
const cors = require('cors');
const mongoose = require('mongoose');

const app = express();
app.use(cors());
app.use(express.json());

app.get('/api/health', (req, res) => res.json({ status: 'ok' }));

app.use((err, req, res, next) => {
  console.error(err);
  res.status(err.status || 500).json({ message: err.message || 'Server error' });
});

const PORT = process.env.PORT || 5000;
const MONGODB_URI = process.env.MONGODB_URI || 'mongodb://localhost:27017/generated_app';

mongoose
  .connect(MONGODB_URI)
  .then(() => app.listen(PORT, () => console.log(`Server listening on ${PORT}`)))
  .catch((err) => {
    console.error('MongoDB connection failed', err);
    process.exit(1);
  });"#
        .to_string()
}

// =============================================================================
// Frontend
// =============================================================================

fn api_client(n: &Names) -> String {
    format!(
        r#"import axios from 'axios';

const api = axios.create({{
  baseURL: import.meta.env.VITE_API_URL || '/api',
  headers: {{ 'Content-Type': 'application/json' }},
}});

export const list = (resource) => api.get(`/${{resource}}`).then((r) => r.data);
export const create = (resource, body) => api.post(`/${{resource}}`, body).then((r) => r.data);
export const update = (resource, id, body) =>
  api.put(`/${{resource}}/${{id}}`, body).then((r) => r.data);
export const remove = (resource, id) => api.delete(`/${{resource}}/${{id}}`);

export const {var}Api = {{
  list: () => list('{plural}'),
  create: (body) => create('{plural}', body),
}};

export default api;"#,
        var = n.var,
        plural = n.plural
    )
}

fn store(n: &Names) -> String {
    format!(
        r#"import {{ create }} from 'zustand';
import api from '../api/client';

export const use{entity}Store = create((set) => ({{
  {plural}: [],
  loading: false,
  error: null,
  fetch{entity}s: async () => {{
    set({{ loading: true, error: null }});
    try {{
      const {{ data }} = await api.get('/{plural}');
      set({{ {plural}: data, loading: false }});
    }} catch (err) {{
      set({{ error: err.message, loading: false }});
    }}
  }},
}}));

export default use{entity}Store;"#,
        entity = n.entity,
        plural = n.plural
    )
}

fn hook(n: &Names) -> String {
    format!(
        r#"import {{ useEffect, useState }} from 'react';

export function use{entity}(loader) {{
  const [data, setData] = useState(null);
  const [error, setError] = useState(null);

  useEffect(() => {{
    let active = true;
    loader()
      .then((result) => active && setData(result))
      .catch((err) => active && setError(err));
    return () => {{
      active = false;
    }};
  }}, [loader]);

  return {{ data, error }};
}}

export default use{entity};"#,
        entity = n.entity
    )
}

fn component(n: &Names) -> String {
    format!(
        r#"import React from 'react';

export default function {entity}({{ title = '{entity}', children }}) {{
  return (
    <section className="{var}">
      <h2>{{title}}</h2>
      {{children}}
    </section>
  );
}}"#,
        entity = n.entity,
        var = n.var
    )
}

fn page(n: &Names) -> String {
    format!(
        r#"import React from 'react';

export default function {entity}Page() {{
  return (
    <main>
      <h1>{entity}</h1>
    </main>
  );
}}"#,
        entity = n.entity
    )
}

fn entry(path: &str) -> String {
    if extension(path) == "html" {
        return r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Generated App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>"#
            .to_string();
    }
    r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App';

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>
);"#
    .to_string()
}

fn style() -> String {
    r#":root {
  font-family: system-ui, -apple-system, sans-serif;
  color: #1f2933;
  background: #f5f7fa;
}

body {
  margin: 0;
  padding: 1rem;
}"#
    .to_string()
}

fn other(n: &Names, path: &str) -> String {
    match extension(path) {
        "md" => format!(
            "# {}\n\nSupporting notes for the generated application.",
            n.entity
        ),
        "json" => format!(
            "{{\n  \"name\": \"{}\",\n  \"private\": true,\n  \"generated\": true\n}}",
            n.stem
        ),
        "html" => entry(path),
        "css" | "scss" => style(),
        "" => format!(
            "# {}\n# Support file generated for this project. Adjust as needed.",
            n.stem
        ),
        _ => format!(
            "// Shared helpers for {stem}.\nconst {var} = {{}};\n\nmodule.exports = {var};",
            stem = n.stem,
            var = n.var
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_from_paths() {
        let n = Names::from_path("routes/tasks.js");
        assert_eq!(n.entity, "Task");
        assert_eq!(n.plural, "tasks");

        let n = Names::from_path("controllers/userController.js");
        assert_eq!(n.entity, "User");

        let n = Names::from_path("src/store/useTaskStore.js");
        assert_eq!(n.entity, "Task");

        let n = Names::from_path("models/Address.js");
        assert_eq!(n.entity, "Address");
    }

    #[test]
    fn fallback_is_deterministic() {
        let a = fallback_content(Tier::Backend, FileCategory::Route, "routes/tasks.js");
        let b = fallback_content(Tier::Backend, FileCategory::Route, "routes/tasks.js");
        assert_eq!(a, b);
        assert!(a.contains("require('../models/Task')"));
        assert!(a.ends_with(";\n"));
    }

    #[test]
    fn env_templates_carry_expected_keys() {
        let backend = fallback_content(Tier::Backend, FileCategory::EnvFile, ".env.example");
        assert!(backend.contains("PORT=5000"));
        assert!(backend.contains("MONGODB_URI="));
        assert!(backend.contains("JWT_SECRET="));

        let frontend = fallback_content(Tier::Frontend, FileCategory::EnvFile, ".env");
        assert!(frontend.contains("VITE_API_URL="));
    }
}

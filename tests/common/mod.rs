#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;
use weaver_forge::config::WeaverConfig;
use weaver_forge::events::{EventSink, TaskEvent};
use weaver_forge::gateway::{
    ChatGateway, ChatRequest, ChatResponse, FinishReason, ModelClient, ModelRoster, ProviderError,
};

/// In-process gateway that answers by stage (attribution caller) and, for
/// file calls, by the `<tier>/<path>` named in the prompt's target tag.
#[derive(Default)]
pub struct ScriptedGateway {
    plan: Option<String>,
    critique: Option<String>,
    files: HashMap<String, String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, reply: impl Into<String>) -> Self {
        self.plan = Some(reply.into());
        self
    }

    pub fn critique(mut self, reply: impl Into<String>) -> Self {
        self.critique = Some(reply.into());
        self
    }

    pub fn file(mut self, key: &str, reply: impl Into<String>) -> Self {
        self.files.insert(key.to_string(), reply.into());
        self
    }

    /// Sleep before every reply.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn file_key(req: &ChatRequest) -> Option<String> {
        let user = &req.messages.last()?.content;
        let start = user.find("<target tier=\"")? + "<target tier=\"".len();
        let tier_end = start + user[start..].find('"')?;
        let tier = &user[start..tier_end];
        let body_start = tier_end + user[tier_end..].find(">\n")? + 2;
        let body_end = body_start + user[body_start..].find("\n</target>")?;
        Some(format!("{tier}/{}", &user[body_start..body_end]))
    }
}

fn missing(what: &str) -> ProviderError {
    ProviderError::backend("scripted", format!("no scripted reply for {what}"), false)
}

#[async_trait::async_trait]
impl ChatGateway for ScriptedGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (label, reply) = match req.attribution.caller {
            "planner" => ("planner".to_string(), self.plan.clone()),
            "critique" => ("critique".to_string(), self.critique.clone()),
            _ => {
                let key = Self::file_key(&req).unwrap_or_else(|| "<unknown>".into());
                let reply = self.files.get(&key).cloned();
                (key, reply)
            }
        };
        self.calls.lock().unwrap().push(label.clone());

        let content = reply.ok_or_else(|| missing(&label))?;
        Ok(ChatResponse {
            content,
            model: req.model.model_id().to_string(),
            input_tokens: 1,
            output_tokens: 1,
            latency: Duration::from_millis(1),
            finish_reason: FinishReason::Stop,
        })
    }
}

pub fn client(gateway: Arc<ScriptedGateway>) -> ModelClient {
    ModelClient::new(gateway, ModelRoster::from_config(&WeaverConfig::default()))
}

/// Event sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(Uuid, TaskEvent)>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, task_id: Uuid, event: TaskEvent) {
        self.events.lock().unwrap().push((task_id, event));
    }
}

pub const TASK_BLUEPRINT: &str = r#"Here is the plan:
{
  "project_name": "task-manager",
  "project_type": "mern",
  "core_entities": ["Task"],
  "backend": {
    "package.json": "Backend manifest",
    "models/Task.js": "Task schema",
    "routes/tasks.js": "Task CRUD routes"
  },
  "frontend": {
    "package.json": "Frontend manifest",
    "src/App.jsx": "Root component listing tasks"
  }
}
Let me know if you need changes."#;

pub const BACKEND_MANIFEST: &str = r#"{
  "name": "task-manager-api",
  "version": "1.0.0",
  "scripts": { "start": "node server.js" },
  "dependencies": { "express": "^4.18.2", "mongoose": "^8.0.0" }
}"#;

pub const TASK_MODEL: &str = r#"const mongoose = require('mongoose');

const taskSchema = new mongoose.Schema({
  title: { type: String, required: true },
  done: { type: Boolean, default: false },
});

module.exports = mongoose.model('Task', taskSchema);"#;

pub const FRONTEND_MANIFEST: &str = r#"{
  "name": "task-manager-ui",
  "private": true,
  "scripts": { "dev": "vite" },
  "dependencies": { "react": "^18.2.0", "axios": "^1.6.0" }
}"#;

pub const APP_COMPONENT: &str = r#"```jsx
import React from 'react';

export default function App() {
  return (
    <main>
      <h1>Tasks</h1>
    </main>
  );
}
```"#;

pub const GOOD_CRITIQUE: &str = r#"{
  "weaving_score": 8,
  "interconnectivity_analysis": "Routes and client agree on /api/tasks.",
  "critical_issues": [],
  "refinements": [
    {"file": "backend/routes/tasks.js", "suggestion": "Move handlers into a controller"},
    "Validate task titles",
    "Add loading state to App",
    "Add pagination"
  ]
}"#;

/// The task-manager script: every file valid except an empty route.
pub fn task_manager_gateway() -> ScriptedGateway {
    ScriptedGateway::new()
        .plan(TASK_BLUEPRINT)
        .critique(GOOD_CRITIQUE)
        .file("backend/package.json", BACKEND_MANIFEST)
        .file("backend/models/Task.js", TASK_MODEL)
        .file("backend/routes/tasks.js", "")
        .file("frontend/package.json", FRONTEND_MANIFEST)
        .file("frontend/src/App.jsx", APP_COMPONENT)
}

//! Per-task output directory: `<output>/<task_id>/{backend,frontend}/...`
//! plus `blueprint.json` and `generation.json`.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blueprint::{Blueprint, FileCategory, Tier};

pub const BLUEPRINT_FILE: &str = "blueprint.json";
pub const MANIFEST_FILE: &str = "generation.json";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("path escapes task directory: {0}")]
    UnsafePath(String),
    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One entry of `generation.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub tier: Tier,
    pub path: String,
    pub category: FileCategory,
    pub accepted: bool,
    pub bytes: usize,
}

/// Contents of `generation.json`. Readers must only trust files of tiers
/// listed in `completed_tiers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub task_id: Uuid,
    pub files: Vec<ManifestEntry>,
    pub completed_tiers: Vec<Tier>,
}

#[derive(Debug)]
pub struct TaskWorkspace {
    root: PathBuf,
    manifest: GenerationManifest,
}

impl TaskWorkspace {
    /// Create `<output_dir>/<task_id>/` and an empty manifest.
    pub async fn create(output_dir: &Path, task_id: Uuid) -> Result<Self, WorkspaceError> {
        let root = output_dir.join(task_id.to_string());
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(io_err(&root))?;

        let ws = Self {
            root,
            manifest: GenerationManifest {
                task_id,
                ..Default::default()
            },
        };
        ws.write_manifest().await?;
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &GenerationManifest {
        &self.manifest
    }

    /// Absolute location of a blueprint path.
    pub fn file_path(&self, tier: Tier, path: &str) -> Result<PathBuf, WorkspaceError> {
        let rel = Path::new(path);
        let safe = rel.components().count() > 0
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(WorkspaceError::UnsafePath(path.to_string()));
        }
        Ok(self.root.join(tier.as_str()).join(rel))
    }

    pub async fn write_blueprint(&self, blueprint: &Blueprint) -> Result<(), WorkspaceError> {
        let json = serde_json::to_vec_pretty(blueprint.document())?;
        write_atomic(&self.root.join(BLUEPRINT_FILE), &json).await
    }

    /// Persist one generated file and record it in the in-memory manifest.
    pub async fn write_file(
        &mut self,
        tier: Tier,
        path: &str,
        category: FileCategory,
        content: &str,
        accepted: bool,
    ) -> Result<PathBuf, WorkspaceError> {
        let target = self.file_path(tier, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }
        tokio::fs::write(&target, content.as_bytes())
            .await
            .map_err(io_err(&target))?;

        self.manifest.files.push(ManifestEntry {
            tier,
            path: path.to_string(),
            category,
            accepted,
            bytes: content.len(),
        });
        Ok(target)
    }

    /// Mark `tier` complete and rewrite `generation.json`.
    pub async fn complete_tier(&mut self, tier: Tier) -> Result<(), WorkspaceError> {
        if !self.manifest.completed_tiers.contains(&tier) {
            self.manifest.completed_tiers.push(tier);
        }
        self.write_manifest().await
    }

    async fn write_manifest(&self) -> Result<(), WorkspaceError> {
        let json = serde_json::to_vec_pretty(&self.manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), &json).await
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
    Ok(())
}

/// Read `generation.json` back from a task directory.
pub async fn read_manifest(task_dir: &Path) -> Result<GenerationManifest, WorkspaceError> {
    let path = task_dir.join(MANIFEST_FILE);
    let bytes = tokio::fs::read(&path).await.map_err(io_err(&path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_files_under_tier_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let mut ws = TaskWorkspace::create(dir.path(), id).await.unwrap();

        let written = ws
            .write_file(
                Tier::Backend,
                "models/Task.js",
                FileCategory::Model,
                "module.exports = 1;\n",
                true,
            )
            .await
            .unwrap();
        assert_eq!(
            written,
            dir.path()
                .join(id.to_string())
                .join("backend/models/Task.js")
        );
        assert_eq!(
            std::fs::read_to_string(&written).unwrap(),
            "module.exports = 1;\n"
        );
    }

    #[tokio::test]
    async fn manifest_marks_tiers_complete() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let mut ws = TaskWorkspace::create(dir.path(), id).await.unwrap();

        let initial = read_manifest(ws.root()).await.unwrap();
        assert!(initial.completed_tiers.is_empty());

        ws.write_file(
            Tier::Backend,
            "server.js",
            FileCategory::Entrypoint,
            "x",
            false,
        )
        .await
        .unwrap();
        ws.complete_tier(Tier::Backend).await.unwrap();

        let m = read_manifest(ws.root()).await.unwrap();
        assert_eq!(m.task_id, id);
        assert_eq!(m.completed_tiers, vec![Tier::Backend]);
        assert_eq!(m.files.len(), 1);
        assert!(!m.files[0].accepted);
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::create(dir.path(), Uuid::new_v4())
            .await
            .unwrap();
        assert!(matches!(
            ws.file_path(Tier::Frontend, "../../etc/passwd"),
            Err(WorkspaceError::UnsafePath(_))
        ));
        assert!(ws.file_path(Tier::Frontend, "/abs").is_err());
    }
}

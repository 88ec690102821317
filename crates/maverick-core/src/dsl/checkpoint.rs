//! Checkpoint stores: crash-safe persistence of run state.
//!
//! The file store keeps one JSON document per checkpoint under
//! `<root>/<workflow_name>/<checkpoint_id>.json`. Writes go to a `.tmp`
//! sibling, are fsynced, then renamed over the target, so a crash never
//! leaves a half-written checkpoint. Orphaned `.tmp` files from an earlier
//! crash are removed when the store is constructed.
//!
//! Checkpoint files are small, so the store uses synchronous file IO inside
//! its async methods; local writes complete in microseconds and an async
//! wrapper would buy nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use maverick_types::checkpoint::CheckpointData;

use super::config::DEFAULTS;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// CheckpointStore trait
// ---------------------------------------------------------------------------

/// Persistence contract for workflow checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint atomically, replacing any previous snapshot
    /// with the same id.
    async fn save(&self, workflow_name: &str, data: CheckpointData) -> Result<(), CheckpointError>;

    /// Load a specific checkpoint, or `None` when absent.
    async fn load(
        &self,
        workflow_name: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointData>, CheckpointError>;

    /// Load the most recently saved checkpoint for a workflow.
    async fn load_latest(
        &self,
        workflow_name: &str,
    ) -> Result<Option<CheckpointData>, CheckpointError>;

    /// Remove every checkpoint for a workflow.
    async fn clear(&self, workflow_name: &str) -> Result<(), CheckpointError>;

    /// List checkpoint ids for a workflow.
    async fn list(&self, workflow_name: &str) -> Result<Vec<String>, CheckpointError>;
}

// ---------------------------------------------------------------------------
// FileCheckpointStore
// ---------------------------------------------------------------------------

/// File-backed checkpoint store with atomic writes.
#[derive(Debug)]
pub struct FileCheckpointStore {
    base_path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `base_path`, or at the default
    /// `.maverick/checkpoints` when `None`.
    ///
    /// Leftover `.tmp` files from an interrupted save are deleted here.
    pub fn new(base_path: Option<PathBuf>) -> Self {
        let store = Self {
            base_path: base_path.unwrap_or_else(|| PathBuf::from(DEFAULTS.checkpoint_dir)),
        };
        store.cleanup_temp_files();
        store
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn workflow_dir(&self, workflow_name: &str) -> PathBuf {
        self.base_path.join(workflow_name)
    }

    fn checkpoint_path(&self, workflow_name: &str, checkpoint_id: &str) -> PathBuf {
        self.workflow_dir(workflow_name)
            .join(format!("{checkpoint_id}.json"))
    }

    fn cleanup_temp_files(&self) {
        let Ok(workflows) = std::fs::read_dir(&self.base_path) else {
            return;
        };
        for workflow in workflows.flatten() {
            let Ok(entries) = std::fs::read_dir(workflow.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.to_string_lossy().ends_with(".json.tmp") {
                    if let Err(error) = std::fs::remove_file(&path) {
                        tracing::warn!(?path, %error, "failed to remove orphaned temp file");
                    } else {
                        tracing::debug!(?path, "removed orphaned temp file");
                    }
                }
            }
        }
    }

    fn read_checkpoint(path: &Path) -> Result<CheckpointData, CheckpointError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, workflow_name: &str, data: CheckpointData) -> Result<(), CheckpointError> {
        let dir = self.workflow_dir(workflow_name);
        std::fs::create_dir_all(&dir)?;

        let target = self.checkpoint_path(workflow_name, &data.checkpoint_id);
        let tmp = dir.join(format!("{}.json.tmp", data.checkpoint_id));

        let content = serde_json::to_string_pretty(&data)?;
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &target)?;

        tracing::debug!(
            workflow = workflow_name,
            checkpoint_id = data.checkpoint_id.as_str(),
            path = %target.display(),
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(
        &self,
        workflow_name: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointData>, CheckpointError> {
        let path = self.checkpoint_path(workflow_name, checkpoint_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_checkpoint(&path)?))
    }

    async fn load_latest(
        &self,
        workflow_name: &str,
    ) -> Result<Option<CheckpointData>, CheckpointError> {
        let dir = self.workflow_dir(workflow_name);
        if !dir.exists() {
            return Ok(None);
        }

        let mut checkpoints = Vec::new();
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                checkpoints.push(Self::read_checkpoint(&path)?);
            }
        }

        checkpoints.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(checkpoints.into_iter().next())
    }

    async fn clear(&self, workflow_name: &str) -> Result<(), CheckpointError> {
        let dir = self.workflow_dir(workflow_name);
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
            }
        }
        // Directory removal is best-effort; other files may remain
        let _ = std::fs::remove_dir(&dir);
        Ok(())
    }

    async fn list(&self, workflow_name: &str) -> Result<Vec<String>, CheckpointError> {
        let dir = self.workflow_dir(workflow_name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// Volatile store with the same contract. Test use only.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    storage: Mutex<HashMap<String, HashMap<String, CheckpointData>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, workflow_name: &str, data: CheckpointData) -> Result<(), CheckpointError> {
        self.storage
            .lock()
            .expect("checkpoint storage poisoned")
            .entry(workflow_name.to_string())
            .or_default()
            .insert(data.checkpoint_id.clone(), data);
        Ok(())
    }

    async fn load(
        &self,
        workflow_name: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointData>, CheckpointError> {
        Ok(self
            .storage
            .lock()
            .expect("checkpoint storage poisoned")
            .get(workflow_name)
            .and_then(|m| m.get(checkpoint_id))
            .cloned())
    }

    async fn load_latest(
        &self,
        workflow_name: &str,
    ) -> Result<Option<CheckpointData>, CheckpointError> {
        let storage = self.storage.lock().expect("checkpoint storage poisoned");
        let mut checkpoints: Vec<CheckpointData> = storage
            .get(workflow_name)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        checkpoints.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(checkpoints.into_iter().next())
    }

    async fn clear(&self, workflow_name: &str) -> Result<(), CheckpointError> {
        self.storage
            .lock()
            .expect("checkpoint storage poisoned")
            .remove(workflow_name);
        Ok(())
    }

    async fn list(&self, workflow_name: &str) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self
            .storage
            .lock()
            .expect("checkpoint storage poisoned")
            .get(workflow_name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

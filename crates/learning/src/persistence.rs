//! JSON snapshot persistence for the experience store.
//!
//! The whole store is small enough to rewrite on every mutation. Writes go
//! to a sibling temp file which is then renamed over the snapshot, so a
//! crash mid-write leaves the previous snapshot intact.

use conductor_core::error::LearningError;
use conductor_core::knowledge::{Lesson, Workflow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_VERSION: u32 = 1;

/// Everything the store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            lessons: Vec::new(),
            workflows: Vec::new(),
        }
    }
}

/// A snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "experience.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the snapshot; a missing file is an empty store.
    pub async fn load(&self) -> Result<Snapshot, LearningError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => {
                return Err(LearningError::Persistence(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            LearningError::Persistence(format!("Corrupt snapshot {}: {e}", self.path.display()))
        })?;

        debug!(
            path = %self.path.display(),
            lessons = snapshot.lessons.len(),
            workflows = snapshot.workflows.len(),
            "Experience snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Write the snapshot atomically (temp file + rename).
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), LearningError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LearningError::Persistence(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| LearningError::Persistence(format!("Failed to serialize snapshot: {e}")))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            LearningError::Persistence(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            LearningError::Persistence(format!("Failed to replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

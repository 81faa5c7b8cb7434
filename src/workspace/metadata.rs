//! Persisted per-workspace bookkeeping: target, timestamps and the sync ledger.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::Result;
use super::paths::normalize_target;

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    File,
    #[default]
    Directory,
}

impl TargetType {
    pub fn of(path: &Path) -> Self {
        if path.is_file() {
            TargetType::File
        } else {
            TargetType::Directory
        }
    }
}

/// One host-to-container copy, replayed on every start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub source: PathBuf,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub target_path: PathBuf,
    pub target_type: TargetType,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub synced_files: Vec<SyncRecord>,
}

impl WorkspaceMetadata {
    fn fresh(target: &Path) -> Self {
        let now = Utc::now();
        Self {
            target_path: target.to_path_buf(),
            target_type: TargetType::of(target),
            created_at: now,
            last_accessed: now,
            synced_files: Vec::new(),
        }
    }
}

/// Read `metadata.json` from a workspace directory without touching it.
/// Missing or corrupt files yield `None`.
pub fn read_metadata(workspace_dir: &Path) -> Option<WorkspaceMetadata> {
    let path = workspace_dir.join(METADATA_FILE);
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!("Ignoring unreadable metadata {}: {}", path.display(), e);
            None
        }
    }
}

/// Owner of a workspace's metadata file. Every mutation is written through
/// before returning.
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    data: WorkspaceMetadata,
}

impl MetadataStore {
    /// Load existing metadata for `target` or start a fresh record. A damaged
    /// file is replaced rather than reported.
    pub fn load_or_init(workspace_dir: &Path, target: &Path) -> Result<Self> {
        let mut store = match read_metadata(workspace_dir) {
            Some(data) => Self {
                dir: workspace_dir.to_path_buf(),
                data,
            },
            None => {
                tracing::debug!("Initializing metadata in {}", workspace_dir.display());
                Self {
                    dir: workspace_dir.to_path_buf(),
                    data: WorkspaceMetadata::fresh(target),
                }
            }
        };

        store.data.last_accessed = Utc::now();
        store.save()?;
        Ok(store)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn metadata(&self) -> &WorkspaceMetadata {
        &self.data
    }

    pub fn records(&self) -> &[SyncRecord] {
        &self.data.synced_files
    }

    /// Upsert by resolved source path; an existing record keeps its position.
    pub fn add_sync_record(&mut self, source: &Path, destination: &str) -> Result<()> {
        let source = normalize_target(source)?;
        match self
            .data
            .synced_files
            .iter_mut()
            .find(|record| record.source == source)
        {
            Some(record) => record.destination = destination.to_string(),
            None => self.data.synced_files.push(SyncRecord {
                source,
                destination: destination.to_string(),
            }),
        }
        self.save()
    }

    pub fn remove_sync_record(&mut self, source: &Path) -> Result<bool> {
        let source = normalize_target(source)?;
        let before = self.data.synced_files.len();
        self.data.synced_files.retain(|record| record.source != source);
        if self.data.synced_files.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Drop records whose source no longer exists, returning those sources.
    pub fn prune_sync_records(&mut self) -> Result<Vec<PathBuf>> {
        let (kept, removed): (Vec<SyncRecord>, Vec<SyncRecord>) = self
            .data
            .synced_files
            .drain(..)
            .partition(|record| record.source.exists());
        self.data.synced_files = kept;

        if removed.is_empty() {
            return Ok(Vec::new());
        }
        self.save()?;
        Ok(removed.into_iter().map(|record| record.source).collect())
    }

    fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(&self.data)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove a workspace directory and its shard parent if that is now empty.
    pub fn destroy(workspace_dir: &Path) -> Result<()> {
        if workspace_dir.exists() {
            fs::remove_dir_all(workspace_dir)?;
        }
        remove_empty_shard(workspace_dir);
        Ok(())
    }
}

pub(crate) fn remove_empty_shard(workspace_dir: &Path) {
    if let Some(shard) = workspace_dir.parent() {
        let empty = fs::read_dir(shard)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            if let Err(e) = fs::remove_dir(shard) {
                tracing::debug!("Could not remove shard {}: {}", shard.display(), e);
            }
        }
    }
}

//! Queries over every workspace recorded under the app directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::error::Result;
use super::metadata::{read_metadata, remove_empty_shard, TargetType};
use super::paths::workspaces_dir;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSummary {
    pub workspace_dir: PathBuf,
    pub target_path: PathBuf,
    pub target_type: TargetType,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub synced_files: usize,
}

impl WorkspaceSummary {
    pub fn is_orphaned(&self) -> bool {
        !self.target_path.exists()
    }
}

pub fn list_workspaces() -> Result<Vec<WorkspaceSummary>> {
    list_workspaces_in(&workspaces_dir()?)
}

/// Walk `<root>/<shard>/<hash>`; shard dirs not named with exactly two
/// characters and workspaces without readable metadata are skipped.
pub fn list_workspaces_in(root: &Path) -> Result<Vec<WorkspaceSummary>> {
    let mut result = Vec::new();
    if !root.exists() {
        return Ok(result);
    }

    for shard in fs::read_dir(root)? {
        let shard = shard?;
        if !shard.file_type()?.is_dir() || shard.file_name().to_string_lossy().chars().count() != 2 {
            continue;
        }

        for entry in fs::read_dir(shard.path())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            if let Some(data) = read_metadata(&dir) {
                result.push(WorkspaceSummary {
                    workspace_dir: dir,
                    target_path: data.target_path,
                    target_type: data.target_type,
                    created_at: data.created_at,
                    last_accessed: data.last_accessed,
                    synced_files: data.synced_files.len(),
                });
            }
        }
    }

    result.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
    Ok(result)
}

pub fn find_orphaned_workspaces() -> Result<Vec<WorkspaceSummary>> {
    find_orphaned_workspaces_in(&workspaces_dir()?)
}

pub fn find_orphaned_workspaces_in(root: &Path) -> Result<Vec<WorkspaceSummary>> {
    Ok(list_workspaces_in(root)?
        .into_iter()
        .filter(WorkspaceSummary::is_orphaned)
        .collect())
}

pub fn cleanup_orphaned_workspaces() -> Result<usize> {
    cleanup_orphaned_workspaces_in(&workspaces_dir()?)
}

/// Remove every orphan and return how many were removed.
pub fn cleanup_orphaned_workspaces_in(root: &Path) -> Result<usize> {
    let orphans = find_orphaned_workspaces_in(root)?;
    let mut removed = 0;
    for orphan in &orphans {
        match fs::remove_dir_all(&orphan.workspace_dir) {
            Ok(()) => {
                tracing::info!(
                    "Removed orphaned workspace for {}",
                    orphan.target_path.display()
                );
                remove_empty_shard(&orphan.workspace_dir);
                removed += 1;
            }
            Err(e) => tracing::warn!(
                "Failed to remove {}: {}",
                orphan.workspace_dir.display(),
                e
            ),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::metadata::MetadataStore;
    use crate::workspace::paths::{compute_identity, normalize_target, workspace_dir_in};
    use tempfile::TempDir;

    fn register(root: &Path, target: &Path) -> PathBuf {
        let target = &normalize_target(target).unwrap();
        let dir = workspace_dir_in(root, &compute_identity(target).unwrap());
        MetadataStore::load_or_init(&dir, target).unwrap();
        dir
    }

    #[test]
    fn test_list_empty_root() {
        let tmp = TempDir::new().unwrap();
        assert!(list_workspaces_in(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_list_skips_junk() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("workspaces");
        let target = tmp.path().join("proj");
        fs::create_dir_all(&target).unwrap();
        register(&root, &target);

        fs::create_dir_all(root.join("not-a-shard").join("x")).unwrap();
        fs::create_dir_all(root.join("zz").join("no-metadata")).unwrap();
        fs::write(root.join("stray.txt"), "x").unwrap();

        let list = list_workspaces_in(&root).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].target_path, target.canonicalize().unwrap());
        assert!(!list[0].is_orphaned());
    }

    #[test]
    fn test_cleanup_removes_only_orphans() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("workspaces");
        let alive = tmp.path().join("alive");
        let dead = tmp.path().join("dead");
        fs::create_dir_all(&alive).unwrap();
        fs::create_dir_all(&dead).unwrap();
        let alive_dir = register(&root, &alive);
        let dead_dir = register(&root, &dead);
        fs::remove_dir_all(&dead).unwrap();

        let orphans = find_orphaned_workspaces_in(&root).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].workspace_dir, dead_dir);

        assert_eq!(cleanup_orphaned_workspaces_in(&root).unwrap(), 1);
        assert!(!dead_dir.exists());
        assert!(alive_dir.exists());
        assert_eq!(list_workspaces_in(&root).unwrap().len(), 1);
    }
}

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::error::{Result, WorkspaceError};

pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on a workspace directory, held while a controller
/// has the workspace started. Released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    _file: File,
}

impl WorkspaceLock {
    pub fn acquire(workspace_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(workspace_dir)?;
        let path = workspace_dir.join(LOCK_FILE);

        // Don't truncate before holding the lock: the PID belongs to the holder.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(WorkspaceError::Locked(workspace_dir.to_path_buf()));
        }

        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!("Locked {}", path.display());
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        tracing::debug!("Released {}", self.path.display());
    }
}

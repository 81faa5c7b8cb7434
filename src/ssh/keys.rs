//! Per-workspace ed25519 key pairs.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::error::{Result, SshError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub public_key: String,
}

/// Stores key pairs as `<keys_dir>/<name>` and `<keys_dir>/<name>.pub`.
#[derive(Debug, Clone)]
pub struct KeyManager {
    keys_dir: PathBuf,
}

impl KeyManager {
    pub fn new(keys_dir: impl Into<PathBuf>) -> Result<Self> {
        let keys_dir = keys_dir.into();
        fs::create_dir_all(&keys_dir)?;
        Ok(Self { keys_dir })
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    fn paths(&self, name: &str) -> (PathBuf, PathBuf) {
        let name = sanitize_key_name(name);
        (
            self.keys_dir.join(&name),
            self.keys_dir.join(format!("{}.pub", name)),
        )
    }

    /// Generate a fresh pair, replacing any existing one with the same name.
    pub fn generate(&self, name: &str) -> Result<KeyPair> {
        let (private_key_path, public_key_path) = self.paths(name);
        for path in [&private_key_path, &public_key_path] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        tracing::info!("Generating ssh key pair '{}'", name);
        let output = Command::new("ssh-keygen")
            .args(["-t", "ed25519", "-N", "", "-q", "-C"])
            .arg(format!("codecell-{}", sanitize_key_name(name)))
            .arg("-f")
            .arg(&private_key_path)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SshError::KeygenNotFound,
                _ => SshError::Io(e),
            })?;

        if !output.status.success() {
            return Err(SshError::KeygenFailed {
                name: name.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        restrict_permissions(&private_key_path)?;
        self.get_key_pair(name)?
            .ok_or(SshError::InvalidKey(public_key_path))
    }

    /// Existing pair for `name`, or `None` when either half is missing.
    pub fn get_key_pair(&self, name: &str) -> Result<Option<KeyPair>> {
        let (private_key_path, public_key_path) = self.paths(name);
        if !private_key_path.exists() || !public_key_path.exists() {
            return Ok(None);
        }

        let public_key = fs::read_to_string(&public_key_path)?.trim().to_string();
        if public_key.is_empty() {
            return Err(SshError::InvalidKey(public_key_path));
        }

        Ok(Some(KeyPair {
            private_key_path,
            public_key_path,
            public_key,
        }))
    }

    pub fn get_or_create_key_pair(&self, name: &str) -> Result<KeyPair> {
        match self.get_key_pair(name)? {
            Some(pair) => Ok(pair),
            None => self.generate(name),
        }
    }

    /// Returns whether anything was deleted.
    pub fn delete_key_pair(&self, name: &str) -> Result<bool> {
        let (private_key_path, public_key_path) = self.paths(name);
        let mut deleted = false;
        for path in [private_key_path, public_key_path] {
            if path.exists() {
                fs::remove_file(&path)?;
                deleted = true;
            }
        }
        Ok(deleted)
    }

    /// Delete every key file, returning the number of pairs removed.
    pub fn cleanup_all(&self) -> Result<usize> {
        let names = self.list_keys()?;
        for name in &names {
            self.delete_key_pair(name)?;
        }
        Ok(names.len())
    }

    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.keys_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let name = file_name
                .strip_suffix(".pub")
                .map(str::to_string)
                .unwrap_or(file_name);
            names.insert(name);
        }
        Ok(names.into_iter().collect())
    }
}

fn sanitize_key_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    match sanitized.trim_start_matches('.') {
        "" => "codecell".to_string(),
        s => s.to_string(),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

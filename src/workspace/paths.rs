//! Application data layout and content-addressed workspace identity.
//!
//! A target path maps to `<app_dir>/workspaces/<hash[..2]>/<hash>` where
//! `hash` is the SHA-256 of the normalized absolute path. Nothing is written
//! into the target tree itself.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub const APP_DIR_ENV: &str = "CODECELL_HOME";
const WORKSPACES_DIR: &str = "workspaces";

/// Root directory for all application data.
///
/// `$CODECELL_HOME` wins when set. Otherwise `%APPDATA%\codecell` on Windows
/// and `~/.codecell` elsewhere.
pub fn get_app_dir() -> io::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(APP_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            let dir = dirs::config_dir().map(|d| d.join("codecell"));
        } else {
            let dir = dirs::home_dir().map(|h| h.join(".codecell"));
        }
    }

    dir.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Cannot find home directory"))
}

pub fn workspaces_dir() -> io::Result<PathBuf> {
    Ok(get_app_dir()?.join(WORKSPACES_DIR))
}

/// Absolute form of `target`, resolved through symlinks when it exists.
pub fn normalize_target(target: &Path) -> io::Result<PathBuf> {
    let absolute = if target.is_absolute() {
        target.to_path_buf()
    } else {
        std::env::current_dir()?.join(target)
    };

    let resolved = match absolute.canonicalize() {
        Ok(path) => path,
        Err(_) => lexical_clean(&absolute),
    };
    Ok(strip_verbatim(resolved))
}

/// Hex SHA-256 of a normalized path string. Separators are unified to `/` and
/// a trailing separator is ignored, so `a/b` and `a/b/` share an identity.
pub fn identity_of(normalized: &str) -> String {
    let unified = normalized.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    format!("{:x}", Sha256::digest(trimmed.as_bytes()))
}

pub fn compute_identity(target: &Path) -> io::Result<String> {
    let normalized = normalize_target(target)?;
    Ok(identity_of(&normalized.to_string_lossy()))
}

/// `<workspaces_dir>/<hash[..2]>/<hash>`
pub fn workspace_dir_in(workspaces_root: &Path, hash: &str) -> PathBuf {
    let shard = hash.get(..2).unwrap_or(hash);
    workspaces_root.join(shard).join(hash)
}

pub fn workspace_dir(target: &Path) -> io::Result<PathBuf> {
    Ok(workspace_dir_in(&workspaces_dir()?, &compute_identity(target)?))
}

/// Drop `.` and fold `..` for paths that don't exist yet.
fn lexical_clean(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC") => PathBuf::from(rest),
        _ => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_identity_ignores_trailing_separator() {
        assert_eq!(identity_of("/home/u/proj"), identity_of("/home/u/proj/"));
        assert_eq!(identity_of("C:\\work\\proj"), identity_of("C:/work/proj/"));
    }

    #[test]
    fn test_identity_distinguishes_paths() {
        assert_ne!(identity_of("/home/u/proj"), identity_of("/home/u/proj2"));
        assert_eq!(identity_of("/x").len(), 64);
    }

    #[test]
    fn test_identity_of_equivalent_spellings() {
        let tmp = TempDir::new().unwrap();
        let proj = tmp.path().join("proj");
        std::fs::create_dir_all(proj.join("sub")).unwrap();

        let plain = compute_identity(&proj).unwrap();
        let dotted = compute_identity(&proj.join("sub").join("..")).unwrap();
        let with_cur = compute_identity(&proj.join(".")).unwrap();
        assert_eq!(plain, dotted);
        assert_eq!(plain, with_cur);
    }

    #[test]
    fn test_normalize_missing_path_is_lexical() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().canonicalize().unwrap();
        let missing = base.join("gone").join("..").join("also-gone");
        assert_eq!(normalize_target(&missing).unwrap(), base.join("also-gone"));
    }

    #[test]
    fn test_workspace_dir_is_sharded() {
        let root = Path::new("/data/workspaces");
        let hash = identity_of("/home/u/proj");
        let dir = workspace_dir_in(root, &hash);
        assert_eq!(dir, root.join(&hash[..2]).join(&hash));
    }

    #[test]
    #[serial]
    fn test_app_dir_env_override() {
        let tmp = TempDir::new().unwrap();
        std::env::set_var(APP_DIR_ENV, tmp.path());
        assert_eq!(get_app_dir().unwrap(), tmp.path());
        assert_eq!(workspaces_dir().unwrap(), tmp.path().join("workspaces"));
        std::env::remove_var(APP_DIR_ENV);
    }
}

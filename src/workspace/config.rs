//! Workspace configuration and user-wide defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Result, WorkspaceError};
use super::metadata::TargetType;
use super::paths::{
    compute_identity, get_app_dir, identity_of, normalize_target, workspace_dir_in, workspaces_dir,
};

pub const CONFIG_FILE: &str = "config.json";
const USER_CONFIG_FILE: &str = "config.toml";
/// Identity hash characters appended to container and image names.
const INSTANCE_HASH_LEN: usize = 8;

pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:24.04";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtualizationType {
    #[default]
    Docker,
    /// Reserved; no backend exists yet.
    Vagrant,
}

impl std::fmt::Display for VirtualizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VirtualizationType::Docker => write!(f, "docker"),
            VirtualizationType::Vagrant => write!(f, "vagrant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub base_image: String,
    pub dockerfile_path: Option<PathBuf>,
    pub container_name_prefix: String,
    /// SSH port inside the container.
    pub ssh_port: u16,
    pub work_dir: String,
    pub user: String,
    pub build_timeout_secs: u64,
    pub create_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            dockerfile_path: None,
            container_name_prefix: "codecell".to_string(),
            ssh_port: 22,
            work_dir: "/workspace".to_string(),
            user: "codecell".to_string(),
            build_timeout_secs: 1800,
            create_timeout_secs: 120,
        }
    }
}

impl DockerConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }
}

/// SSH settings as seen from the host. `host`/`port` are refreshed from the
/// backend's port mapping on every start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub timeout_secs: u64,
    pub ready_retries: u32,
    pub ready_interval_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            username: "codecell".to_string(),
            timeout_secs: 30,
            ready_retries: 60,
            ready_interval_ms: 1000,
        }
    }
}

impl SshConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub auto_init: bool,
    pub auto_commit: bool,
    pub default_gitignore: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_init: true,
            auto_commit: true,
            default_gitignore: [
                "__pycache__/",
                "*.pyc",
                ".venv/",
                "node_modules/",
                ".env",
                "*.log",
                ".DS_Store",
                "Thumbs.db",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// User-wide defaults from `<app_dir>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub language: Option<String>,
    pub docker: DockerConfig,
    pub ssh: SshConfig,
    pub git: GitConfig,
}

fn user_config_path() -> Result<PathBuf> {
    Ok(get_app_dir()?.join(USER_CONFIG_FILE))
}

impl UserConfig {
    /// Built-in defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = user_config_path()?;
        if !path.exists() {
            return Ok(UserConfig::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: UserConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

pub fn save_user_config(config: &UserConfig) -> Result<()> {
    let path = user_config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(&path, content)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub name: String,
    pub target_path: PathBuf,
    #[serde(default)]
    pub target_type: TargetType,
    #[serde(default)]
    pub virtualization_type: VirtualizationType,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub git: GitConfig,
    /// Overrides the content-addressed location under the app directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

impl WorkspaceConfig {
    /// Config for `target` seeded from built-in defaults.
    pub fn new(target: &Path) -> Result<Self> {
        Self::with_defaults(target, &UserConfig::default())
    }

    /// Config for `target` seeded from `~/.codecell/config.toml`.
    pub fn from_user_defaults(target: &Path) -> Result<Self> {
        Self::with_defaults(target, &UserConfig::load()?)
    }

    pub fn with_defaults(target: &Path, defaults: &UserConfig) -> Result<Self> {
        let target_path = normalize_target(target)?;
        let name = target_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "workspace".to_string());

        let mut ssh = defaults.ssh.clone();
        ssh.username = defaults.docker.user.clone();

        Ok(Self {
            name,
            target_type: TargetType::of(&target_path),
            target_path,
            virtualization_type: VirtualizationType::Docker,
            language: defaults.language.clone(),
            docker: defaults.docker.clone(),
            ssh,
            git: defaults.git.clone(),
            workspace_dir: None,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    /// Deterministic from the target path unless overridden.
    pub fn workspace_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.workspace_dir {
            return Ok(dir.clone());
        }
        let hash = compute_identity(&self.target_path)?;
        Ok(workspace_dir_in(&workspaces_dir()?, &hash))
    }

    /// Name plus a short identity hash, so same-named targets in different
    /// directories never share a container or an image.
    pub fn instance_name(&self) -> String {
        let hash = identity_of(&self.target_path.to_string_lossy());
        format!("{}-{}", self.name, hash.get(..INSTANCE_HASH_LEN).unwrap_or(&hash))
    }

    pub fn container_name(&self) -> String {
        crate::containers::container_name(&self.docker.container_name_prefix, &self.instance_name())
    }

    pub fn validate(&self) -> Result<()> {
        if self.virtualization_type != VirtualizationType::Docker {
            return Err(WorkspaceError::Configuration(format!(
                "Unsupported virtualization type: {}",
                self.virtualization_type
            )));
        }
        if self.name.trim().is_empty() {
            return Err(WorkspaceError::Configuration(
                "Workspace name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = WorkspaceConfig::new(tmp.path()).unwrap();

        assert_eq!(config.virtualization_type, VirtualizationType::Docker);
        assert_eq!(config.target_type, TargetType::Directory);
        assert_eq!(config.docker.base_image, DEFAULT_BASE_IMAGE);
        assert_eq!(config.docker.work_dir, "/workspace");
        assert_eq!(config.docker.ssh_port, 22);
        assert_eq!(config.ssh.timeout_secs, 30);
        assert_eq!(config.ssh.username, config.docker.user);
        assert!(config.git.auto_init);
        assert!(config.git.default_gitignore.contains(&"node_modules/".to_string()));
        assert_eq!(config.docker.build_timeout(), Duration::from_secs(1800));
        assert_eq!(config.docker.create_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_name_from_target() {
        let tmp = TempDir::new().unwrap();
        let proj = tmp.path().join("my-proj");
        fs::create_dir_all(&proj).unwrap();
        let config = WorkspaceConfig::new(&proj).unwrap();
        assert_eq!(config.name, "my-proj");

        let name = config.container_name();
        let suffix = name.strip_prefix("codecell-my-proj-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_same_basename_gets_distinct_instances() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a/proj");
        let b = tmp.path().join("b/proj");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();

        let a = WorkspaceConfig::new(&a).unwrap();
        let b = WorkspaceConfig::new(&b).unwrap();
        assert_eq!(a.name, b.name);
        assert_ne!(a.container_name(), b.container_name());

        let (docker_a, docker_b) = (
            crate::containers::Docker::from_workspace_config(&a),
            crate::containers::Docker::from_workspace_config(&b),
        );
        assert_eq!(docker_a.container_name(), a.container_name());
        assert_ne!(docker_a.image_tag(), docker_b.image_tag());
    }

    #[test]
    fn test_json_round_trip() {
        let tmp = TempDir::new().unwrap();
        let config = WorkspaceConfig::new(tmp.path())
            .unwrap()
            .with_language("python")
            .with_name("custom");
        let path = tmp.path().join("ws").join(CONFIG_FILE);
        config.save(&path).unwrap();

        let loaded = WorkspaceConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"name": "p", "target_path": "/tmp/p", "docker": {"user": "dev"}}"#;
        let config: WorkspaceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.docker.user, "dev");
        assert_eq!(config.docker.work_dir, "/workspace");
        assert_eq!(config.virtualization_type, VirtualizationType::Docker);
        assert!(config.git.auto_commit);
    }

    #[test]
    fn test_vagrant_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = WorkspaceConfig::new(tmp.path()).unwrap();
        config.virtualization_type = VirtualizationType::Vagrant;
        assert!(matches!(
            config.validate(),
            Err(WorkspaceError::Configuration(_))
        ));
    }

    #[test]
    fn test_workspace_dir_override() {
        let tmp = TempDir::new().unwrap();
        let config = WorkspaceConfig::new(tmp.path())
            .unwrap()
            .with_workspace_dir(tmp.path().join("custom"));
        assert_eq!(config.workspace_dir().unwrap(), tmp.path().join("custom"));
    }

    #[test]
    #[serial]
    fn test_workspace_dir_is_deterministic() {
        let home = TempDir::new().unwrap();
        std::env::set_var("CODECELL_HOME", home.path());

        let target = TempDir::new().unwrap();
        let a = WorkspaceConfig::new(target.path()).unwrap();
        let b = WorkspaceConfig::new(&target.path().join(".")).unwrap();
        let dir = a.workspace_dir().unwrap();
        assert_eq!(dir, b.workspace_dir().unwrap());
        assert!(dir.starts_with(home.path().join("workspaces")));

        std::env::remove_var("CODECELL_HOME");
    }

    #[test]
    fn test_user_config_toml() {
        let content = r#"
language = "rust"

[docker]
base_image = "debian:12"
build_timeout_secs = 600

[ssh]
ready_retries = 10
"#;
        let config: UserConfig = toml::from_str(content).unwrap();
        assert_eq!(config.language.as_deref(), Some("rust"));
        assert_eq!(config.docker.base_image, "debian:12");
        assert_eq!(config.docker.build_timeout_secs, 600);
        assert_eq!(config.docker.user, "codecell");
        assert_eq!(config.ssh.ready_retries, 10);

        let empty: UserConfig = toml::from_str("").unwrap();
        assert_eq!(empty, UserConfig::default());
    }

    #[test]
    #[serial]
    fn test_user_config_save_and_load() {
        let home = TempDir::new().unwrap();
        std::env::set_var("CODECELL_HOME", home.path());

        assert_eq!(UserConfig::load().unwrap(), UserConfig::default());

        let mut config = UserConfig::default();
        config.docker.user = "dev".to_string();
        save_user_config(&config).unwrap();
        assert_eq!(UserConfig::load().unwrap().docker.user, "dev");

        let target = TempDir::new().unwrap();
        let ws = WorkspaceConfig::from_user_defaults(target.path()).unwrap();
        assert_eq!(ws.docker.user, "dev");
        assert_eq!(ws.ssh.username, "dev");

        std::env::remove_var("CODECELL_HOME");
    }
}

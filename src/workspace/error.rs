use std::path::PathBuf;

use thiserror::Error;

use crate::containers::ContainerError;
use crate::ssh::SshError;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not connect to workspace: {0}")]
    Connection(String),

    #[error("Workspace not started: cannot {0}")]
    NotStarted(String),

    #[error("Workspace has been destroyed; create a new one")]
    Destroyed,

    #[error("Workspace at {0} is in use by another process")]
    Locked(PathBuf),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to write config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

//! Workspaces: durable per-target state on the host plus the lifecycle
//! controller that drives a container for it.
//!
//! On disk every workspace lives at
//! `<app_dir>/workspaces/<hash[..2]>/<hash>/` where `hash` is the SHA-256 of
//! the normalized target path, holding `config.json`, `metadata.json`,
//! `keys/`, `temp/` and `logs/`.

mod config;
mod error;
mod lock;
mod metadata;
mod paths;
mod registry;
mod scope;
#[allow(clippy::module_inception)]
mod workspace;

pub use config::{
    save_user_config, DockerConfig, GitConfig, SshConfig, UserConfig, VirtualizationType,
    WorkspaceConfig, CONFIG_FILE, DEFAULT_BASE_IMAGE,
};
pub use error::{Result, WorkspaceError};
pub use lock::{WorkspaceLock, LOCK_FILE};
pub use metadata::{
    read_metadata, MetadataStore, SyncRecord, TargetType, WorkspaceMetadata, METADATA_FILE,
};
pub use paths::{
    compute_identity, get_app_dir, identity_of, normalize_target, workspace_dir,
    workspace_dir_in, workspaces_dir, APP_DIR_ENV,
};
pub use registry::{
    cleanup_orphaned_workspaces, cleanup_orphaned_workspaces_in, find_orphaned_workspaces,
    find_orphaned_workspaces_in, list_workspaces, list_workspaces_in, WorkspaceSummary,
};
pub use scope::{generate, open_workspace, run, scoped, with_workspace, WorkspaceOptions};
pub use workspace::{
    Workspace, WorkspaceState, DEFAULT_STOP_TIMEOUT, KEYS_DIR, LOGS_DIR, TEMP_DIR,
};

pub mod container_interface;
pub mod docker;
pub mod error;

pub use container_interface::{ConnectionParams, ContainerBackend, ContainerState, InstanceInfo};
pub use docker::Docker;
pub use error::{ContainerError, Result};

pub const MANAGED_LABEL: &str = "codecell.managed";
pub const WORKSPACE_LABEL: &str = "codecell.workspace";

/// Reduce a workspace name to something valid as a container or image name.
pub fn sanitize_name(name: &str) -> String {
    let mapped: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        "workspace".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn container_name(prefix: &str, workspace: &str) -> String {
    format!("{}-{}", prefix, sanitize_name(workspace))
}

/// Every instance carrying the managed label, queried fresh from the backend.
pub fn list_managed_instances(backend: &dyn ContainerBackend) -> Result<Vec<InstanceInfo>> {
    backend.list_instances()
}

pub fn is_docker_available() -> bool {
    Docker::is_available()
}

pub fn is_daemon_running() -> bool {
    Docker::is_daemon_running()
}

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Result;
use crate::process::ExecOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Stopped,
    Paused,
    NotFound,
    Error,
}

impl ContainerState {
    /// Map a runtime status string (`docker inspect` `.State.Status`).
    pub fn from_status(status: &str) -> Self {
        match status.trim() {
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "created" | "exited" | "dead" => ContainerState::Stopped,
            _ => ContainerState::Error,
        }
    }
}

/// Where the transport should connect, as seen from the host after port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub workspace: String,
}

/// Capabilities a container runtime must provide to host workspaces.
///
/// Everything is expressed against instance identifiers and plain data so the
/// lifecycle controller never touches runtime-specific objects.
pub trait ContainerBackend: Send {
    /// Build an image and return a reference usable by `create`.
    /// `None` means the backend generates its default Dockerfile.
    fn build(&self, dockerfile: Option<&str>) -> Result<String>;

    /// Create an instance from `image`. A stale instance with the same name is
    /// stopped and removed first.
    fn create(&self, image: &str) -> Result<String>;

    fn start(&self, id: &str) -> Result<()>;

    fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Remove the instance. Already stopped or missing instances are not an error.
    fn destroy(&self, id: &str) -> Result<()>;

    fn get_state(&self, id: &str) -> ContainerState;

    fn execute(
        &self,
        id: &str,
        command: &str,
        workdir: Option<&str>,
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> ExecOutput;

    /// Copy `local` into the instance at `remote`. With `flatten` and a
    /// directory source, the directory's contents land directly in `remote`.
    fn copy_to(&self, id: &str, local: &Path, remote: &str, flatten: bool) -> Result<()>;

    /// Copy `remote` out of the instance into `local`. With `flatten`, the
    /// contents of a remote directory land directly in `local`.
    fn copy_from(&self, id: &str, remote: &str, local: &Path, flatten: bool) -> Result<()>;

    fn connection_params(&self, id: &str) -> Result<ConnectionParams>;

    fn get_logs(&self, id: &str, tail: Option<usize>) -> Result<String>;

    fn list_instances(&self) -> Result<Vec<InstanceInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_status() {
        assert_eq!(ContainerState::from_status("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_status("paused\n"), ContainerState::Paused);
        assert_eq!(ContainerState::from_status("exited"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_status("created"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_status("dead"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_status("restarting"), ContainerState::Error);
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(
        "Docker is not installed or not in PATH.\n\
         Install Docker: https://docs.docker.com/get-docker/"
    )]
    NotInstalled,

    #[error(
        "Docker daemon is not running.\n\
         Start Docker Desktop or run: sudo systemctl start docker"
    )]
    DaemonNotRunning,

    #[error(
        "Docker permission denied.\n\
         On Linux, add your user to the docker group:\n\
         sudo usermod -aG docker $USER\n\
         Then log out and back in."
    )]
    PermissionDenied,

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Docker image not found: {0}")]
    ImageNotFound(String),

    #[error("Failed to build image: {0}")]
    BuildFailed(String),

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Failed to stop container: {0}")]
    StopFailed(String),

    #[error("Failed to remove container: {0}")]
    RemoveFailed(String),

    #[error("Container {0} is still being removed")]
    RemovalInProgress(String),

    #[error("Failed to copy {0}")]
    CopyFailed(String),

    #[error("Docker command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ContainerError {
    /// Map common docker CLI stderr messages onto the specific variants,
    /// falling back to `fallback` for anything unrecognised.
    pub(crate) fn classify(stderr: &str, fallback: impl FnOnce(String) -> Self) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("permission denied") && lower.contains("docker") {
            return ContainerError::PermissionDenied;
        }
        if stderr.contains("Cannot connect to the Docker daemon") {
            return ContainerError::DaemonNotRunning;
        }
        fallback(stderr.trim().to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error(
        "ssh-keygen not found in PATH.\n\
         Install the OpenSSH client tools to provision workspace keys."
    )]
    KeygenNotFound,

    #[error("Failed to generate key pair '{name}': {message}")]
    KeygenFailed { name: String, message: String },

    #[error("Invalid key file {0}")]
    InvalidKey(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SshError>;

//! Authenticated remote channel into a running workspace container.

pub mod client;
pub mod error;
pub mod keys;

use std::path::Path;
use std::thread;
use std::time::Duration;

pub use client::SshClient;
pub use error::{Result, SshError};
pub use keys::{KeyManager, KeyPair};

use crate::containers::ConnectionParams;
use crate::process::ExecOutput;

const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Command execution and file copy over a remote channel.
///
/// Working directory and environment are folded into the command line; the
/// channel itself only runs opaque commands.
pub trait Transport: Send {
    fn execute(
        &self,
        command: &str,
        workdir: Option<&str>,
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> ExecOutput;

    fn copy_to(&self, local: &Path, remote: &str, recursive: bool) -> bool;

    fn copy_from(&self, remote: &str, local: &Path, recursive: bool) -> bool;

    /// Poll a trivial command until it succeeds or `max_retries` run out.
    fn wait_for_ready(&self, max_retries: u32, interval: Duration) -> bool {
        for attempt in 1..=max_retries {
            if self
                .execute("echo ok", None, &[], Some(READY_PROBE_TIMEOUT))
                .success()
            {
                tracing::debug!("Transport ready after {} attempt(s)", attempt);
                return true;
            }
            if attempt < max_retries {
                thread::sleep(interval);
            }
        }
        false
    }

    fn is_connected(&self) -> bool {
        self.execute("echo ok", None, &[], Some(READY_PROBE_TIMEOUT))
            .success()
    }
}

/// Provisions keys and opens transports for a workspace.
pub trait TransportProvider: Send {
    fn key_pair(&self, keys_dir: &Path, name: &str) -> Result<KeyPair>;

    fn delete_key_pair(&self, keys_dir: &Path, name: &str) -> Result<bool>;

    fn connect(
        &self,
        params: &ConnectionParams,
        keys: &KeyPair,
        timeout: Duration,
    ) -> Box<dyn Transport>;
}

/// Default provider: `ssh-keygen` keys and the system OpenSSH client.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshProvider;

impl TransportProvider for SshProvider {
    fn key_pair(&self, keys_dir: &Path, name: &str) -> Result<KeyPair> {
        KeyManager::new(keys_dir)?.get_or_create_key_pair(name)
    }

    fn delete_key_pair(&self, keys_dir: &Path, name: &str) -> Result<bool> {
        if !keys_dir.exists() {
            return Ok(false);
        }
        KeyManager::new(keys_dir)?.delete_key_pair(name)
    }

    fn connect(
        &self,
        params: &ConnectionParams,
        keys: &KeyPair,
        timeout: Duration,
    ) -> Box<dyn Transport> {
        Box::new(SshClient::new(
            &params.host,
            params.port,
            &params.user,
            &keys.private_key_path,
            timeout,
        ))
    }
}

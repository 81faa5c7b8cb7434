use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::Transport;
use crate::process::{run_with_timeout, ExecOutput};
use crate::shell::with_context;

/// Transport over the system `ssh`/`scp` binaries with a dedicated key.
#[derive(Debug, Clone)]
pub struct SshClient {
    host: String,
    port: u16,
    user: String,
    private_key_path: PathBuf,
    timeout: Duration,
}

impl SshClient {
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        private_key_path: &Path,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            private_key_path: private_key_path.to_path_buf(),
            timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.private_key_path.to_string_lossy().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeout.as_secs().max(1)),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ]
    }

    /// Arguments for `ssh` running `command` on the remote host.
    pub(crate) fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    /// Arguments for `scp`; `from` and `to` are already in `user@host:path`
    /// form where remote.
    pub(crate) fn build_scp_args(&self, from: &str, to: &str, recursive: bool) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        if recursive {
            args.push("-r".to_string());
        }
        args.push(from.to_string());
        args.push(to.to_string());
        args
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn remote(&self, path: &str) -> String {
        format!("{}:{}", self.destination(), path)
    }

    fn scp(&self, from: &str, to: &str, recursive: bool) -> bool {
        let mut cmd = Command::new("scp");
        cmd.args(self.build_scp_args(from, to, recursive));
        tracing::debug!("scp {} {}", from, to);

        let output = run_with_timeout(cmd, Some(self.timeout * 2));
        if !output.success() {
            tracing::debug!("scp failed: {}", output.stderr.trim());
        }
        output.success()
    }
}

impl Transport for SshClient {
    fn execute(
        &self,
        command: &str,
        workdir: Option<&str>,
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> ExecOutput {
        let full = with_context(command, workdir, env);
        tracing::debug!("ssh {}:{} {}", self.host, self.port, command);

        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(&full));
        run_with_timeout(cmd, Some(timeout.unwrap_or(self.timeout)))
    }

    fn copy_to(&self, local: &Path, remote: &str, recursive: bool) -> bool {
        self.scp(&local.to_string_lossy(), &self.remote(remote), recursive)
    }

    fn copy_from(&self, remote: &str, local: &Path, recursive: bool) -> bool {
        self.scp(&self.remote(remote), &local.to_string_lossy(), recursive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SshClient {
        SshClient::new(
            "127.0.0.1",
            40022,
            "codecell",
            Path::new("/keys/proj"),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_build_ssh_args() {
        let args = client().build_ssh_args("echo ok");
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/proj"]));
        assert!(args.windows(2).any(|w| w == ["-o", "StrictHostKeyChecking=no"]));
        assert!(args.windows(2).any(|w| w == ["-o", "BatchMode=yes"]));
        assert!(args.windows(2).any(|w| w == ["-o", "ConnectTimeout=30"]));
        assert!(args.windows(2).any(|w| w == ["-p", "40022"]));
        let n = args.len();
        assert_eq!(args[n - 2], "codecell@127.0.0.1");
        assert_eq!(args[n - 1], "echo ok");
    }

    #[test]
    fn test_build_scp_args() {
        let c = client();
        let args = c.build_scp_args("/tmp/a.py", &c.remote("/workspace/a.py"), true);
        assert!(args.windows(2).any(|w| w == ["-P", "40022"]));
        assert!(args.contains(&"-r".to_string()));
        let n = args.len();
        assert_eq!(args[n - 2], "/tmp/a.py");
        assert_eq!(args[n - 1], "codecell@127.0.0.1:/workspace/a.py");

        let args = c.build_scp_args("a", "b", false);
        assert!(!args.contains(&"-r".to_string()));
    }

    #[test]
    fn test_accessors() {
        let c = client();
        assert_eq!(c.host(), "127.0.0.1");
        assert_eq!(c.port(), 40022);
        assert_eq!(c.user(), "codecell");
    }
}

use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use super::container_interface::{ConnectionParams, ContainerBackend, ContainerState, InstanceInfo};
use super::error::{ContainerError, Result};
use super::{container_name, sanitize_name, MANAGED_LABEL, WORKSPACE_LABEL};
use crate::credentials::auth_environment;
use crate::process::{run_with_timeout, ExecOutput};
use crate::shell::ShellCommand;
use crate::templates::DockerfileTemplate;
use crate::workspace::{DockerConfig, WorkspaceConfig};

const STALE_REMOVAL_POLLS: u32 = 10;
const STALE_REMOVAL_INTERVAL: Duration = Duration::from_millis(500);
const STALE_STOP_TIMEOUT_SECS: u64 = 5;

/// Docker runtime driven through the `docker` CLI.
pub struct Docker {
    workspace: String,
    config: DockerConfig,
    language: Option<String>,
}

impl Docker {
    pub fn new(workspace: &str, config: DockerConfig, language: Option<String>) -> Self {
        Self {
            workspace: workspace.to_string(),
            config,
            language,
        }
    }

    pub fn from_workspace_config(config: &WorkspaceConfig) -> Self {
        Self::new(&config.instance_name(), config.docker.clone(), config.language.clone())
    }

    pub fn is_available() -> bool {
        Command::new("docker")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn is_daemon_running() -> bool {
        Command::new("docker")
            .args(["info"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn container_name(&self) -> String {
        container_name(&self.config.container_name_prefix, &self.workspace)
    }

    pub fn image_tag(&self) -> String {
        format!("codecell/{}:latest", sanitize_name(&self.workspace))
    }

    fn docker(args: &[&str]) -> std::io::Result<Output> {
        Command::new("docker").args(args).output()
    }

    fn exists(&self, name: &str) -> bool {
        Self::docker(&["container", "inspect", name])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn default_dockerfile(&self) -> Result<String> {
        if let Some(path) = &self.config.dockerfile_path {
            tracing::debug!("Using Dockerfile from {}", path.display());
            return Ok(fs::read_to_string(path)?);
        }

        let mut template = DockerfileTemplate::new(
            &self.config.base_image,
            &self.config.user,
            &self.config.work_dir,
        );
        if let Some(language) = &self.language {
            template = template.with_language(language);
        }
        Ok(template.render())
    }

    /// Build the `docker create` arguments. Separated from `create` to enable
    /// unit testing.
    pub(crate) fn build_create_args(
        &self,
        name: &str,
        image: &str,
        host_port: u16,
        environment: &[(String, String)],
    ) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--rm".to_string(),
            "--label".to_string(),
            format!("{}=true", MANAGED_LABEL),
            "--label".to_string(),
            format!("{}={}", WORKSPACE_LABEL, self.workspace),
            "-p".to_string(),
            format!("127.0.0.1:{}:{}", host_port, self.config.ssh_port),
        ];

        for (key, value) in environment {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(image.to_string());
        args
    }

    /// Stop and remove a leftover instance with our name. The runtime may
    /// already be auto-removing it, in which case we wait for it to go away.
    fn remove_stale(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Ok(());
        }

        tracing::info!("Removing stale container '{}'", name);
        let timeout = STALE_STOP_TIMEOUT_SECS.to_string();
        let _ = Self::docker(&["stop", "-t", &timeout, name]);

        let output = Self::docker(&["rm", "-f", name])?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        let lower = stderr.to_lowercase();
        if lower.contains("removal") || lower.contains("in progress") {
            for _ in 0..STALE_REMOVAL_POLLS {
                thread::sleep(STALE_REMOVAL_INTERVAL);
                if !self.exists(name) {
                    return Ok(());
                }
            }
            return Err(ContainerError::RemovalInProgress(name.to_string()));
        }

        Err(ContainerError::classify(&stderr, ContainerError::RemoveFailed))
    }

    fn root_exec(&self, id: &str, command: &ShellCommand) -> Result<()> {
        let rendered = command.render();
        let output = Self::docker(&["exec", "-u", "root", id, "/bin/sh", "-c", &rendered])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::classify(&stderr, |msg| {
                ContainerError::CommandFailed(format!("{}: {}", rendered, msg))
            }));
        }
        Ok(())
    }
}

impl ContainerBackend for Docker {
    fn build(&self, dockerfile: Option<&str>) -> Result<String> {
        let content = match dockerfile {
            Some(content) => content.to_string(),
            None => self.default_dockerfile()?,
        };

        let context = tempfile::tempdir()?;
        let dockerfile_path = context.path().join("Dockerfile");
        fs::write(&dockerfile_path, content)?;

        let tag = self.image_tag();
        tracing::info!("Building image '{}'", tag);

        let mut cmd = Command::new("docker");
        cmd.args(["build", "-t", &tag, "-f"])
            .arg(&dockerfile_path)
            .arg(context.path());
        let output = run_with_timeout(cmd, Some(self.config.build_timeout()));

        if !output.success() {
            tracing::debug!("build stderr: {}", output.stderr);
            return Err(ContainerError::classify(
                &output.stderr,
                ContainerError::BuildFailed,
            ));
        }

        Ok(tag)
    }

    fn create(&self, image: &str) -> Result<String> {
        let name = self.container_name();
        self.remove_stale(&name)?;

        let host_port = free_port()?;
        let args = self.build_create_args(&name, image, host_port, &auth_environment());
        tracing::info!(
            "Creating container '{}' from '{}' (ssh on 127.0.0.1:{})",
            name,
            image,
            host_port
        );

        let mut cmd = Command::new("docker");
        cmd.args(&args);
        let output = run_with_timeout(cmd, Some(self.config.create_timeout()));

        if !output.success() {
            tracing::debug!("stderr: {}", output.stderr);
            if output.stderr.contains("No such image")
                || output.stderr.contains("Unable to find image")
            {
                return Err(ContainerError::ImageNotFound(image.to_string()));
            }
            return Err(ContainerError::classify(
                &output.stderr,
                ContainerError::CreateFailed,
            ));
        }

        Ok(output.stdout.trim().to_string())
    }

    fn start(&self, id: &str) -> Result<()> {
        let output = Self::docker(&["start", id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::classify(&stderr, ContainerError::StartFailed));
        }

        Ok(())
    }

    fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        let output = Self::docker(&["stop", "-t", &secs, id])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Auto-removed on exit, so a missing container is already stopped.
            if stderr.contains("No such container") {
                tracing::debug!("Container {} already gone", id);
                return Ok(());
            }
            return Err(ContainerError::classify(&stderr, ContainerError::StopFailed));
        }

        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<()> {
        let timeout = STALE_STOP_TIMEOUT_SECS.to_string();
        let _ = Self::docker(&["stop", "-t", &timeout, id]);

        let output = Self::docker(&["rm", "-f", id])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lower = stderr.to_lowercase();
            if stderr.contains("No such container") || lower.contains("removal") {
                return Ok(());
            }
            return Err(ContainerError::classify(&stderr, ContainerError::RemoveFailed));
        }

        Ok(())
    }

    fn get_state(&self, id: &str) -> ContainerState {
        match Self::docker(&["container", "inspect", "-f", "{{.State.Status}}", id]) {
            Ok(output) if output.status.success() => {
                ContainerState::from_status(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) => ContainerState::NotFound,
            Err(e) => {
                tracing::debug!("docker inspect failed: {}", e);
                ContainerState::Error
            }
        }
    }

    fn execute(
        &self,
        id: &str,
        command: &str,
        workdir: Option<&str>,
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> ExecOutput {
        let mut cmd = Command::new("docker");
        cmd.args(["exec", "-u", &self.config.user, "-w"])
            .arg(workdir.unwrap_or(&self.config.work_dir));
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        cmd.arg(id).args(["/bin/sh", "-c", command]);

        run_with_timeout(cmd, timeout)
    }

    fn copy_to(&self, id: &str, local: &Path, remote: &str, flatten: bool) -> Result<()> {
        if !local.exists() {
            return Err(ContainerError::CopyFailed(format!(
                "{}: no such file or directory",
                local.display()
            )));
        }

        let flatten_dir = flatten && local.is_dir();
        let target_dir = if flatten_dir {
            remote.to_string()
        } else {
            remote_parent(remote)
        };
        self.root_exec(id, &ShellCommand::new("mkdir").arg("-p").arg(&target_dir))?;

        let source = if flatten_dir {
            format!("{}/.", local.display())
        } else {
            local.display().to_string()
        };
        let destination = format!("{}:{}", id, remote);
        tracing::debug!("docker cp {} {}", source, destination);

        let output = Self::docker(&["cp", &source, &destination])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::classify(&stderr, |msg| {
                ContainerError::CopyFailed(format!("{} -> {}: {}", source, destination, msg))
            }));
        }

        if self.config.user != "root" {
            let owner = format!("{0}:{0}", self.config.user);
            if let Err(e) =
                self.root_exec(id, &ShellCommand::new("chown").args(["-R", &owner, remote]))
            {
                tracing::warn!("Failed to hand {} to {}: {}", remote, self.config.user, e);
            }
        }

        Ok(())
    }

    fn copy_from(&self, id: &str, remote: &str, local: &Path, flatten: bool) -> Result<()> {
        fs::create_dir_all(local)?;

        let staging = tempfile::tempdir()?;
        let source = if flatten {
            format!("{}:{}/.", id, remote.trim_end_matches('/'))
        } else {
            format!("{}:{}", id, remote)
        };
        let staging_str = staging.path().to_string_lossy().to_string();
        tracing::debug!("docker cp {} {}", source, staging_str);

        let output = Self::docker(&["cp", &source, &staging_str])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::classify(&stderr, |msg| {
                ContainerError::CopyFailed(format!("{} -> {}: {}", source, local.display(), msg))
            }));
        }

        merge_tree(staging.path(), local)?;
        Ok(())
    }

    fn connection_params(&self, id: &str) -> Result<ConnectionParams> {
        let port_spec = format!("{}/tcp", self.config.ssh_port);
        let output = Self::docker(&["port", id, &port_spec])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                return Err(ContainerError::ContainerNotFound(id.to_string()));
            }
            return Err(ContainerError::classify(&stderr, ContainerError::CommandFailed));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let port = parse_port_mapping(&stdout).ok_or_else(|| {
            ContainerError::CommandFailed(format!(
                "No host port mapped for {} on {}",
                port_spec, id
            ))
        })?;

        Ok(ConnectionParams {
            host: "127.0.0.1".to_string(),
            port,
            user: self.config.user.clone(),
        })
    }

    fn get_logs(&self, id: &str, tail: Option<usize>) -> Result<String> {
        let tail = tail.map(|n| n.to_string());
        let mut args = vec!["logs"];
        if let Some(n) = &tail {
            args.push("--tail");
            args.push(n);
        }
        args.push(id);

        let output = Self::docker(&args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                return Ok(String::new());
            }
            return Err(ContainerError::classify(&stderr, ContainerError::CommandFailed));
        }

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        let filter = format!("label={}=true", MANAGED_LABEL);
        let output = Self::docker(&["ps", "-a", "--filter", &filter, "--format", "{{json .}}"])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::classify(&stderr, ContainerError::CommandFailed));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_instance_line)
            .collect())
    }
}

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn remote_parent(remote: &str) -> String {
    match Path::new(remote).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().to_string(),
        _ => "/".to_string(),
    }
}

/// Parse `docker port` output such as `127.0.0.1:49153` or `[::]:49153`.
fn parse_port_mapping(stdout: &str) -> Option<u16> {
    stdout
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

fn parse_instance_line(line: &str) -> Option<InstanceInfo> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let workspace = field("Labels")
        .split(',')
        .find_map(|label| label.strip_prefix(&format!("{}=", WORKSPACE_LABEL)).map(str::to_string))
        .unwrap_or_default();

    let status = match field("State") {
        s if s.is_empty() => field("Status"),
        s => s,
    };

    Some(InstanceInfo {
        id: field("ID"),
        name: field("Names"),
        status,
        workspace,
    })
}

/// Copy the contents of `src` into `dst`, overwriting files and skipping any
/// `.git` directory so container-side history never clobbers the host's.
pub(crate) fn merge_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            merge_tree(&from, &to)?;
        } else if file_type.is_file() {
            if to.is_dir() {
                fs::remove_dir_all(&to)?;
            }
            fs::copy(&from, &to)?;
        } else {
            tracing::debug!("Skipping special file {}", from.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn docker_for(name: &str) -> Docker {
        Docker::new(name, DockerConfig::default(), None)
    }

    fn get_docker_if_available() -> Option<Docker> {
        if Docker::is_available() && Docker::is_daemon_running() {
            Some(docker_for("docker-test"))
        } else {
            None
        }
    }

    #[test]
    fn test_container_name_and_image_tag() {
        let docker = docker_for("My Project");
        assert_eq!(docker.container_name(), "codecell-my-project");
        assert_eq!(docker.image_tag(), "codecell/my-project:latest");
    }

    #[test]
    fn test_build_create_args() {
        let docker = docker_for("proj");
        let env = vec![("GH_TOKEN".to_string(), "t0k".to_string())];
        let args = docker.build_create_args("codecell-proj", "codecell/proj:latest", 40022, &env);

        assert_eq!(args[0], "create");
        assert!(args.windows(2).any(|w| w == ["--name", "codecell-proj"]));
        assert!(args.contains(&"--rm".to_string()));
        assert!(args
            .windows(2)
            .any(|w| w == ["--label", "codecell.managed=true"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--label", "codecell.workspace=proj"]));
        assert!(args.windows(2).any(|w| w == ["-p", "127.0.0.1:40022:22"]));
        assert!(args.windows(2).any(|w| w == ["-e", "GH_TOKEN=t0k"]));
        assert_eq!(args.last().map(String::as_str), Some("codecell/proj:latest"));
    }

    #[test]
    fn test_default_dockerfile_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile.custom");
        fs::write(&path, "FROM alpine:3\n").unwrap();

        let config = DockerConfig {
            dockerfile_path: Some(path),
            ..DockerConfig::default()
        };
        let docker = Docker::new("proj", config, None);
        assert_eq!(docker.default_dockerfile().unwrap(), "FROM alpine:3\n");
    }

    #[test]
    fn test_default_dockerfile_is_language_aware() {
        let docker = Docker::new("proj", DockerConfig::default(), Some("python".to_string()));
        let content = docker.default_dockerfile().unwrap();
        assert!(content.contains("python3"));
        assert!(content.contains("WORKDIR /workspace"));
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/workspace/a.py"), "/workspace");
        assert_eq!(remote_parent("/a.py"), "/");
        assert_eq!(remote_parent("a.py"), "/");
    }

    #[test]
    fn test_parse_port_mapping() {
        assert_eq!(parse_port_mapping("127.0.0.1:49153\n"), Some(49153));
        assert_eq!(parse_port_mapping("0.0.0.0:32768\n[::]:32768\n"), Some(32768));
        assert_eq!(parse_port_mapping(""), None);
        assert_eq!(parse_port_mapping("garbage"), None);
    }

    #[test]
    fn test_parse_instance_line() {
        let line = r#"{"ID":"abc123","Names":"codecell-proj","State":"running","Status":"Up 2 minutes","Labels":"codecell.managed=true,codecell.workspace=proj"}"#;
        let info = parse_instance_line(line).unwrap();
        assert_eq!(info.id, "abc123");
        assert_eq!(info.name, "codecell-proj");
        assert_eq!(info.status, "running");
        assert_eq!(info.workspace, "proj");

        assert!(parse_instance_line("not json").is_none());
    }

    #[test]
    fn test_merge_tree_skips_git_and_overwrites() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        fs::write(src.path().join("a.py"), "new").unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.py"), "b").unwrap();
        fs::create_dir_all(src.path().join(".git/objects")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();

        fs::write(dst.path().join("a.py"), "old").unwrap();
        fs::write(dst.path().join("keep.txt"), "keep").unwrap();

        merge_tree(src.path(), dst.path()).unwrap();

        assert_eq!(fs::read_to_string(dst.path().join("a.py")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dst.path().join("sub/b.py")).unwrap(), "b");
        assert_eq!(fs::read_to_string(dst.path().join("keep.txt")).unwrap(), "keep");
        assert!(!dst.path().join(".git").exists());
    }

    #[test]
    fn test_copy_to_missing_source_fails_without_docker_call() {
        let docker = docker_for("proj");
        let missing = PathBuf::from("/definitely/not/here/xyz");
        let err = docker.copy_to("whatever", &missing, "/workspace", true).unwrap_err();
        assert!(matches!(err, ContainerError::CopyFailed(_)));
    }

    #[test]
    fn test_get_state_of_missing_container() {
        if let Some(docker) = get_docker_if_available() {
            assert_eq!(
                docker.get_state("codecell-nonexistent-container-xyz"),
                ContainerState::NotFound
            );
        }
    }

    #[test]
    fn test_destroy_missing_container_is_noop() {
        if let Some(docker) = get_docker_if_available() {
            assert!(docker.destroy("codecell-nonexistent-container-xyz").is_ok());
        }
    }
}

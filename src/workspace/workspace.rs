//! Lifecycle controller binding one host target to one container.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::{Agent, AgentKind, AgentOptions, AgentResult, CodeAgent};
use crate::containers::{ContainerBackend, ContainerState, Docker};
use crate::git::{CommitInfo, Git, GitCoordinator, DEFAULT_COMMIT_MESSAGE};
use crate::process::ExecOutput;
use crate::shell::ShellCommand;
use crate::ssh::{KeyPair, SshProvider, Transport, TransportProvider};

use super::config::{WorkspaceConfig, CONFIG_FILE};
use super::error::{Result, WorkspaceError};
use super::lock::WorkspaceLock;
use super::metadata::{MetadataStore, SyncRecord, TargetType};
use super::paths::{normalize_target, workspace_dir};

pub const KEYS_DIR: &str = "keys";
pub const TEMP_DIR: &str = "temp";
pub const LOGS_DIR: &str = "logs";

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const KEY_INJECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    Destroyed,
}

impl std::fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkspaceState::Uninitialized => "uninitialized",
            WorkspaceState::Initialized => "initialized",
            WorkspaceState::Started => "started",
            WorkspaceState::Stopped => "stopped",
            WorkspaceState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// A host target and the container mirroring it.
///
/// The transport only exists between a successful `start` and the next
/// `stop`/`destroy`; every operation that reaches into the container fails
/// with [`WorkspaceError::NotStarted`] outside that window.
pub struct Workspace {
    config: WorkspaceConfig,
    dir: PathBuf,
    state: WorkspaceState,
    metadata: Option<MetadataStore>,
    backend: Option<Box<dyn ContainerBackend>>,
    provider: Box<dyn TransportProvider>,
    transport: Option<Box<dyn Transport>>,
    git: Option<GitCoordinator>,
    container_id: Option<String>,
    agents: HashMap<AgentKind, Agent>,
    lock: Option<WorkspaceLock>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("name", &self.config.name)
            .field("dir", &self.dir)
            .field("state", &self.state)
            .field("container_id", &self.container_id)
            .finish_non_exhaustive()
    }
}

/// The saved config for `target`, or a fresh one from the user defaults.
pub(crate) fn load_config(target: &Path) -> Result<WorkspaceConfig> {
    let target = normalize_target(target)?;
    let saved = workspace_dir(&target)?.join(CONFIG_FILE);
    if !saved.exists() {
        return WorkspaceConfig::from_user_defaults(&target);
    }

    match WorkspaceConfig::load(&saved) {
        Ok(config) if config.target_path == target => Ok(config),
        Ok(_) => {
            tracing::warn!("{} belongs to another target, ignoring", saved.display());
            WorkspaceConfig::from_user_defaults(&target)
        }
        Err(e) => {
            tracing::warn!("Failed to load {}, using defaults: {}", saved.display(), e);
            WorkspaceConfig::from_user_defaults(&target)
        }
    }
}

fn not_started(action: &str) -> WorkspaceError {
    WorkspaceError::NotStarted(action.to_string())
}

impl Workspace {
    /// Open the workspace for `target`, reusing its saved config when one
    /// exists and seeding a new one from the user defaults otherwise.
    pub fn new(target: &Path) -> Result<Self> {
        Self::with_config(load_config(target)?)
    }

    /// Controller using the Docker backend and the system SSH client.
    pub fn with_config(config: WorkspaceConfig) -> Result<Self> {
        Self::build(config, None, Box::new(SshProvider))
    }

    /// Controller with explicit collaborators.
    pub fn with_parts(
        config: WorkspaceConfig,
        backend: Box<dyn ContainerBackend>,
        provider: Box<dyn TransportProvider>,
    ) -> Result<Self> {
        Self::build(config, Some(backend), provider)
    }

    fn build(
        config: WorkspaceConfig,
        backend: Option<Box<dyn ContainerBackend>>,
        provider: Box<dyn TransportProvider>,
    ) -> Result<Self> {
        let dir = config.workspace_dir()?;
        Ok(Self {
            config,
            dir,
            state: WorkspaceState::Uninitialized,
            metadata: None,
            backend,
            provider,
            transport: None,
            git: None,
            container_id: None,
            agents: HashMap::new(),
            lock: None,
        })
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn status(&self) -> WorkspaceState {
        self.state
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn sync_records(&self) -> &[SyncRecord] {
        self.metadata.as_ref().map(|m| m.records()).unwrap_or(&[])
    }

    /// Running means a live transport and a backend that still reports the
    /// instance as running.
    pub fn is_running(&self) -> bool {
        if self.transport.is_none() {
            return false;
        }
        match (self.backend.as_deref(), self.container_id.as_deref()) {
            (Some(backend), Some(id)) => backend.get_state(id) == ContainerState::Running,
            _ => false,
        }
    }

    /// Create the on-disk layout, load metadata and persist the config.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == WorkspaceState::Destroyed {
            return Err(WorkspaceError::Destroyed);
        }

        for sub in [KEYS_DIR, TEMP_DIR, LOGS_DIR] {
            fs::create_dir_all(self.dir.join(sub))?;
        }
        self.metadata = Some(MetadataStore::load_or_init(
            &self.dir,
            &self.config.target_path,
        )?);
        self.config.save(&self.dir.join(CONFIG_FILE))?;

        if self.state == WorkspaceState::Uninitialized {
            self.state = WorkspaceState::Initialized;
        }
        Ok(())
    }

    fn ensure_backend(&mut self) -> Result<()> {
        if self.backend.is_none() {
            self.config.validate()?;
            self.backend = Some(Box::new(Docker::from_workspace_config(&self.config)));
        }
        Ok(())
    }

    fn metadata_mut(&mut self) -> Result<&mut MetadataStore> {
        if self.metadata.is_none() {
            self.initialize()?;
        }
        self.metadata
            .as_mut()
            .ok_or_else(|| not_started("read workspace metadata"))
    }

    fn transport(&self, action: &str) -> Result<&dyn Transport> {
        self.transport.as_deref().ok_or_else(|| not_started(action))
    }

    /// Backend and instance id of the live container.
    fn live_container(&self, action: &str) -> Result<(&dyn ContainerBackend, &str)> {
        self.transport(action)?;
        match (self.backend.as_deref(), self.container_id.as_deref()) {
            (Some(backend), Some(id)) => Ok((backend, id)),
            _ => Err(not_started(action)),
        }
    }

    pub fn start(&mut self) -> Result<String> {
        self.start_with_dockerfile(None)
    }

    /// Build, create and connect, then replay the sync ledger.
    ///
    /// `dockerfile` overrides the configured or generated Dockerfile. Returns
    /// the container id. A failed start removes whatever container it created.
    pub fn start_with_dockerfile(&mut self, dockerfile: Option<&str>) -> Result<String> {
        match (self.state, &self.container_id) {
            (WorkspaceState::Destroyed, _) => return Err(WorkspaceError::Destroyed),
            (WorkspaceState::Started, Some(id)) if self.transport.is_some() => {
                return Ok(id.clone());
            }
            _ => {}
        }

        self.initialize()?;
        self.ensure_backend()?;
        if self.lock.is_none() {
            self.lock = Some(WorkspaceLock::acquire(&self.dir)?);
        }

        let keys = match self
            .provider
            .key_pair(&self.dir.join(KEYS_DIR), &self.config.name)
        {
            Ok(keys) => keys,
            Err(e) => {
                self.lock = None;
                return Err(e.into());
            }
        };

        if let Err(e) = self.boot(dockerfile, &keys) {
            self.abort();
            return Err(e);
        }

        self.state = WorkspaceState::Started;
        if let Err(e) = self.config.save(&self.dir.join(CONFIG_FILE)) {
            tracing::warn!("Failed to save connection details for '{}': {}", self.config.name, e);
        }
        self.replay_ledger();

        if self.config.git.auto_init {
            let ready = self.git()?.ensure_initialized();
            if !ready {
                tracing::warn!("Could not initialize git in {}", self.config.docker.work_dir);
            }
        }

        let id = self.container_id.clone().unwrap_or_default();
        tracing::info!("Workspace '{}' started ({})", self.config.name, id);
        Ok(id)
    }

    fn boot(&mut self, dockerfile: Option<&str>, keys: &KeyPair) -> Result<()> {
        let backend = self
            .backend
            .as_deref()
            .ok_or_else(|| not_started("reach the container backend"))?;

        tracing::info!("Building image for '{}'", self.config.name);
        let image = backend.build(dockerfile)?;

        let id = backend.create(&image)?;
        self.container_id = Some(id.clone());
        backend.start(&id)?;
        tracing::info!("Started container {}", id);

        let inject = authorized_keys_command(&self.config.docker.user, &keys.public_key);
        let output = backend.execute(&id, &inject.render(), None, &[], Some(KEY_INJECT_TIMEOUT));
        if !output.success() {
            return Err(WorkspaceError::Connection(format!(
                "could not install SSH key: {}",
                output.stderr.trim()
            )));
        }
        tracing::info!("Installed SSH key for {}", self.config.docker.user);

        let params = backend.connection_params(&id)?;
        self.config.ssh.host = params.host.clone();
        self.config.ssh.port = params.port;
        self.config.ssh.username = params.user.clone();

        let transport = self
            .provider
            .connect(&params, keys, self.config.ssh.timeout());
        let retries = self.config.ssh.ready_retries;
        if !transport.wait_for_ready(retries, self.config.ssh.ready_interval()) {
            return Err(WorkspaceError::Connection(format!(
                "{}@{}:{} not reachable after {} attempts",
                params.user, params.host, params.port, retries
            )));
        }
        tracing::info!("Connected to {}:{}", params.host, params.port);

        self.transport = Some(transport);
        Ok(())
    }

    /// Best-effort removal of a half-started container.
    fn abort(&mut self) {
        self.transport = None;
        self.git = None;
        if let (Some(backend), Some(id)) = (self.backend.as_deref(), self.container_id.take()) {
            tracing::info!("Removing container {} after failed start", id);
            if let Err(e) = backend.destroy(&id) {
                tracing::warn!("Cleanup of {} failed: {}", id, e);
            }
        }
        self.lock = None;
    }

    /// Re-copy every recorded sync whose source still exists. Missing sources
    /// and failed copies are logged and left in the ledger.
    fn replay_ledger(&mut self) -> usize {
        let records: Vec<SyncRecord> = self.sync_records().to_vec();
        let (Some(backend), Some(id)) = (self.backend.as_deref(), self.container_id.as_deref())
        else {
            return 0;
        };

        let mut replayed = 0;
        for record in &records {
            if !record.source.exists() {
                tracing::warn!(
                    "Skipping sync of {}: source no longer exists",
                    record.source.display()
                );
                continue;
            }
            let flatten = record.source == self.config.target_path;
            match backend.copy_to(id, &record.source, &record.destination, flatten) {
                Ok(()) => replayed += 1,
                Err(e) => tracing::warn!(
                    "Failed to resync {} -> {}: {}",
                    record.source.display(),
                    record.destination,
                    e
                ),
            }
        }

        if !records.is_empty() {
            tracing::info!("Replayed {}/{} sync record(s)", replayed, records.len());
        }
        replayed
    }

    /// Reconnect to this workspace's container when another process started
    /// it. Returns false when no such container is running.
    pub fn attach(&mut self) -> Result<bool> {
        if self.transport.is_some() {
            return Ok(true);
        }
        self.initialize()?;
        self.ensure_backend()?;

        let name = self.config.container_name();
        let backend = self
            .backend
            .as_deref()
            .ok_or_else(|| not_started("reach the container backend"))?;
        if backend.get_state(&name) != ContainerState::Running {
            return Ok(false);
        }

        let keys = self
            .provider
            .key_pair(&self.dir.join(KEYS_DIR), &self.config.name)?;
        let params = backend.connection_params(&name)?;
        let transport = self
            .provider
            .connect(&params, &keys, self.config.ssh.timeout());
        if !transport.wait_for_ready(self.config.ssh.ready_retries, self.config.ssh.ready_interval()) {
            return Err(WorkspaceError::Connection(format!(
                "{}:{} not reachable",
                params.host, params.port
            )));
        }

        tracing::debug!("Attached to {}", name);
        self.transport = Some(transport);
        self.container_id = Some(name);
        self.state = WorkspaceState::Started;
        Ok(true)
    }

    /// Stop the container and drop the transport. Stopping a workspace that
    /// isn't running does nothing.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.state == WorkspaceState::Destroyed {
            return Err(WorkspaceError::Destroyed);
        }

        // The next container starts without the repository.
        self.transport = None;
        self.git = None;
        if let Some(id) = self.container_id.clone() {
            if let Some(backend) = self.backend.as_deref() {
                tracing::info!("Stopping container {}", id);
                backend.stop(&id, timeout)?;
            }
            self.container_id = None;
        }

        if self.state == WorkspaceState::Started {
            self.state = WorkspaceState::Stopped;
        }
        self.lock = None;
        Ok(())
    }

    /// Remove the container, the key pair and the whole workspace directory.
    /// The controller is unusable afterwards.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == WorkspaceState::Destroyed {
            return Ok(());
        }

        self.transport = None;
        self.ensure_backend()?;
        let id = self
            .container_id
            .take()
            .unwrap_or_else(|| self.config.container_name());
        if let Some(backend) = self.backend.as_deref() {
            tracing::info!("Destroying container {}", id);
            backend.destroy(&id)?;
        }

        match self
            .provider
            .delete_key_pair(&self.dir.join(KEYS_DIR), &self.config.name)
        {
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to delete key pair: {}", e),
        }

        self.lock = None;
        self.metadata = None;
        self.git = None;
        self.agents.clear();
        MetadataStore::destroy(&self.dir)?;

        self.state = WorkspaceState::Destroyed;
        tracing::info!("Workspace '{}' destroyed", self.config.name);
        Ok(())
    }

    /// Run `command` in the container, by default from the work directory.
    /// A failing command is a normal result, not an error.
    pub fn execute(
        &self,
        command: &str,
        workdir: Option<&str>,
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let transport = self.transport("execute commands")?;
        let workdir = workdir.unwrap_or(&self.config.docker.work_dir);
        Ok(transport.execute(command, Some(workdir), env, timeout))
    }

    /// Copy a host path into the container, recording it for replay when
    /// `record` is set. The target root itself is copied flattened.
    pub fn copy_to_container(&mut self, local: &Path, remote: &str, record: bool) -> Result<()> {
        let (backend, id) = self.live_container("copy files to the container")?;
        let flatten = normalize_target(local)? == self.config.target_path;

        tracing::debug!("Copying {} -> {}", local.display(), remote);
        backend.copy_to(id, local, remote, flatten)?;

        if record {
            self.metadata_mut()?.add_sync_record(local, remote)?;
        }
        Ok(())
    }

    /// Copy the whole target into the work directory. A directory target maps
    /// onto the work directory itself; a file lands directly inside it.
    pub fn sync_to_container(&mut self, record: bool) -> Result<()> {
        let target = self.config.target_path.clone();
        let remote = self.target_remote_path();
        self.copy_to_container(&target, &remote, record)
    }

    fn target_remote_path(&self) -> String {
        let work_dir = &self.config.docker.work_dir;
        match (self.config.target_type, self.config.target_path.file_name()) {
            (TargetType::File, Some(name)) => {
                format!("{}/{}", work_dir.trim_end_matches('/'), name.to_string_lossy())
            }
            _ => work_dir.clone(),
        }
    }

    /// Copy `remote` out of the container into the host directory `local`.
    pub fn copy_from_container(&self, remote: &str, local: &Path) -> Result<()> {
        let (backend, id) = self.live_container("copy files from the container")?;
        backend.copy_from(id, remote, local, false)?;
        Ok(())
    }

    /// Copy container state back to the host. With `files`, only those paths
    /// (relative to the work directory or absolute) cross over; otherwise the
    /// whole work directory is merged into the target.
    pub fn sync_from_container(&self, destination: Option<&Path>, files: &[String]) -> Result<()> {
        let (backend, id) = self.live_container("copy files from the container")?;
        let work_dir = self.config.docker.work_dir.as_str();

        let destination = match destination {
            Some(dest) => dest.to_path_buf(),
            None => match self.config.target_type {
                TargetType::Directory => self.config.target_path.clone(),
                TargetType::File => self
                    .config
                    .target_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.config.target_path.clone()),
            },
        };

        if !files.is_empty() {
            for file in files {
                let (remote, relative) = resolve_remote(work_dir, file);
                let local_dir = match Path::new(&relative).parent() {
                    Some(parent) => destination.join(parent),
                    None => destination.clone(),
                };
                tracing::debug!("Copying {} -> {}", remote, local_dir.display());
                backend.copy_from(id, &remote, &local_dir, false)?;
            }
            return Ok(());
        }

        match self.config.target_type {
            TargetType::Directory => backend.copy_from(id, work_dir, &destination, true)?,
            TargetType::File => {
                backend.copy_from(id, &self.target_remote_path(), &destination, false)?
            }
        }
        Ok(())
    }

    /// Drop ledger entries whose host source is gone.
    pub fn prune_synced_files(&mut self) -> Result<Vec<PathBuf>> {
        let removed = self.metadata_mut()?.prune_sync_records()?;
        if !removed.is_empty() {
            tracing::info!("Pruned {} sync record(s)", removed.len());
        }
        Ok(removed)
    }

    /// The cached adapter for `kind`, created on first use.
    pub fn get_agent(&mut self, kind: &str) -> Result<&Agent> {
        self.transport("use an agent")?;
        let kind: AgentKind = kind
            .parse()
            .map_err(|e: crate::agents::UnknownAgent| WorkspaceError::Configuration(e.to_string()))?;
        Ok(&*self.agents.entry(kind).or_insert_with(|| Agent::new(kind)))
    }

    pub fn run_agent(
        &mut self,
        kind: &str,
        prompt: &str,
        workdir: Option<&str>,
        context_files: &[String],
        options: &AgentOptions,
    ) -> Result<AgentResult> {
        let agent = self.get_agent(kind)?.clone();
        let transport = self.transport("use an agent")?;
        let workdir = workdir.unwrap_or(&self.config.docker.work_dir);
        Ok(agent.execute(transport, prompt, Some(workdir), context_files, options))
    }

    /// Git inside the container.
    pub fn git(&mut self) -> Result<Git<'_>> {
        let transport = self
            .transport
            .as_deref()
            .ok_or_else(|| not_started("use git"))?;
        let coordinator = self.git.get_or_insert_with(|| {
            GitCoordinator::new(&self.config.docker.work_dir, self.config.git.clone())
        });
        Ok(coordinator.with(transport))
    }

    /// Commit everything in the work directory. `None` when nothing changed.
    pub fn commit_changes(&mut self, message: Option<&str>) -> Result<Option<String>> {
        let message = message.unwrap_or(DEFAULT_COMMIT_MESSAGE);
        Ok(self.git()?.commit_all(message))
    }

    /// False for an unknown reference rather than an error.
    pub fn rollback_to(&mut self, reference: &str, hard: bool) -> Result<bool> {
        Ok(self.git()?.rollback(reference, hard))
    }

    pub fn list_commits(&mut self, max_count: usize) -> Result<Vec<CommitInfo>> {
        Ok(self.git()?.list_commits(max_count))
    }

    /// Container logs, empty when there is no container.
    pub fn get_logs(&self, tail: Option<usize>) -> Result<String> {
        match (self.backend.as_deref(), self.container_id.as_deref()) {
            (Some(backend), Some(id)) => Ok(backend.get_logs(id, tail)?),
            _ => Ok(String::new()),
        }
    }

    /// Empty the workspace's `temp/` directory.
    pub fn cleanup(&self) -> Result<()> {
        let temp = self.dir.join(TEMP_DIR);
        if temp.exists() {
            fs::remove_dir_all(&temp)?;
        }
        fs::create_dir_all(&temp)?;
        Ok(())
    }
}

fn authorized_keys_command(user: &str, public_key: &str) -> ShellCommand {
    let home = if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", user)
    };
    let ssh_dir = format!("{}/.ssh", home);
    let authorized = format!("{}/authorized_keys", ssh_dir);

    ShellCommand::new("mkdir")
        .args(["-p", &ssh_dir])
        .and_then(
            ShellCommand::new("printf")
                .args(["%s\\n", public_key.trim()])
                .raw(">>")
                .arg(&authorized),
        )
        .and_then(ShellCommand::new("chmod").args(["700", &ssh_dir]))
        .and_then(ShellCommand::new("chmod").args(["600", &authorized]))
}

/// Absolute container path for `file` and its path relative to the work dir.
/// Absolute paths outside the work dir keep only their file name.
fn resolve_remote(work_dir: &str, file: &str) -> (String, String) {
    let work_dir = work_dir.trim_end_matches('/');
    if let Some(rest) = file.strip_prefix('/') {
        let relative = match file.strip_prefix(work_dir) {
            Some(inside) if inside.starts_with('/') => inside.trim_start_matches('/').to_string(),
            _ => Path::new(rest)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| rest.to_string()),
        };
        return (file.to_string(), relative);
    }
    let relative = file.trim_start_matches("./").to_string();
    (format!("{}/{}", work_dir, relative), relative)
}

//! In-memory container runtime for driving workspaces without Docker.
//!
//! [`FakeRuntime`] hands out a backend and a transport provider that share one
//! state: containers with a flat file map, a log of every copy, and scripted
//! replies for remote commands. Stopping a container throws its files away,
//! like a `--rm` container.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::containers::{
    ConnectionParams, ContainerBackend, ContainerError, ContainerState, InstanceInfo, Result,
};
use crate::process::ExecOutput;
use crate::ssh::{self, KeyPair, Transport, TransportProvider};

pub const FAKE_IMAGE: &str = "codecell/fake:latest";
pub const FAKE_SSH_PORT: u16 = 2222;

/// One `copy_to` issued against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCall {
    pub source: PathBuf,
    pub destination: String,
    pub flatten: bool,
}

#[derive(Debug, Default)]
struct FakeContainer {
    running: bool,
    files: BTreeMap<String, String>,
}

type StartHook = Arc<dyn Fn(&str) + Send + Sync>;

struct RuntimeState {
    next_id: u32,
    builds: usize,
    fail_builds: bool,
    reachable: bool,
    containers: BTreeMap<String, FakeContainer>,
    copies: Vec<CopyCall>,
    backend_commands: Vec<String>,
    transport_commands: Vec<String>,
    destroyed: Vec<String>,
    scripts: Vec<(String, ExecOutput)>,
    on_start: Option<StartHook>,
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("containers", &self.containers.keys().collect::<Vec<_>>())
            .field("builds", &self.builds)
            .field("reachable", &self.reachable)
            .finish_non_exhaustive()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            next_id: 0,
            builds: 0,
            fail_builds: false,
            reachable: true,
            containers: BTreeMap::new(),
            copies: Vec::new(),
            backend_commands: Vec::new(),
            transport_commands: Vec::new(),
            destroyed: Vec::new(),
            scripts: Vec::new(),
            on_start: None,
        }
    }
}

impl RuntimeState {
    fn running(&mut self) -> Option<&mut FakeContainer> {
        self.containers.values_mut().find(|c| c.running)
    }

    fn take_script(&mut self, command: &str) -> Option<ExecOutput> {
        let index = self
            .scripts
            .iter()
            .position(|(prefix, _)| command.starts_with(prefix.as_str()))?;
        Some(self.scripts.remove(index).1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
}

fn lock(state: &Mutex<RuntimeState>) -> MutexGuard<'_, RuntimeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> Box<dyn ContainerBackend> {
        Box::new(FakeBackend {
            state: Arc::clone(&self.state),
        })
    }

    pub fn provider(&self) -> Box<dyn TransportProvider> {
        Box::new(FakeProvider {
            state: Arc::clone(&self.state),
        })
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        lock(&self.state)
    }

    /// When false every transport command fails as if sshd never came up.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn fail_builds(&self, fail: bool) {
        self.state().fail_builds = fail;
    }

    /// Run `hook` with the container id every time a container starts.
    pub fn on_start(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.state().on_start = Some(Arc::new(hook));
    }

    /// Reply with `output` to the next transport command starting with
    /// `prefix`. Each script is used once, in the order added.
    pub fn script(&self, prefix: &str, output: ExecOutput) {
        self.state().scripts.push((prefix.to_string(), output));
    }

    pub fn builds(&self) -> usize {
        self.state().builds
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.state().copies.clone()
    }

    pub fn clear_copies(&self) {
        self.state().copies.clear();
    }

    pub fn backend_commands(&self) -> Vec<String> {
        self.state().backend_commands.clone()
    }

    pub fn transport_commands(&self) -> Vec<String> {
        self.state().transport_commands.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state().destroyed.clone()
    }

    pub fn running_containers(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// File content inside the running container.
    pub fn file(&self, path: &str) -> Option<String> {
        self.state().running()?.files.get(path).cloned()
    }

    /// All file paths inside the running container.
    pub fn files(&self) -> Vec<String> {
        self.state()
            .running()
            .map(|c| c.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Write a file inside the running container, as a command would.
    pub fn write_file(&self, path: &str, content: &str) -> bool {
        match self.state().running() {
            Some(container) => {
                container.files.insert(path.to_string(), content.to_string());
                true
            }
            None => false,
        }
    }
}

fn join_remote(base: &str, rest: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rest.trim_start_matches('/'))
}

fn basename(path: &str) -> String {
    Path::new(path.trim_end_matches('/'))
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Every regular file under `dir`, as paths relative to it.
fn walk(dir: &Path, prefix: &Path, out: &mut Vec<(PathBuf, PathBuf)>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = prefix.join(entry.file_name());
        if path.is_dir() {
            walk(&path, &relative, out)?;
        } else {
            out.push((path, relative));
        }
    }
    Ok(())
}

struct FakeBackend {
    state: Arc<Mutex<RuntimeState>>,
}

impl FakeBackend {
    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        lock(&self.state)
    }
}

impl ContainerBackend for FakeBackend {
    fn build(&self, _dockerfile: Option<&str>) -> Result<String> {
        let mut state = self.state();
        if state.fail_builds {
            return Err(ContainerError::BuildFailed("scripted failure".to_string()));
        }
        state.builds += 1;
        Ok(FAKE_IMAGE.to_string())
    }

    fn create(&self, image: &str) -> Result<String> {
        let mut state = self.state();
        if image != FAKE_IMAGE {
            return Err(ContainerError::ImageNotFound(image.to_string()));
        }
        // One workspace per runtime: anything left over is the stale instance.
        state.containers.clear();
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(id.clone(), FakeContainer::default());
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<()> {
        let hook = {
            let mut state = self.state();
            let container = state
                .containers
                .get_mut(id)
                .ok_or_else(|| ContainerError::ContainerNotFound(id.to_string()))?;
            container.running = true;
            state.on_start.clone()
        };
        if let Some(hook) = hook {
            hook(id);
        }
        Ok(())
    }

    fn stop(&self, id: &str, _timeout: Duration) -> Result<()> {
        self.state().containers.remove(id);
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if state.containers.remove(id).is_some() {
            state.destroyed.push(id.to_string());
        }
        Ok(())
    }

    fn get_state(&self, id: &str) -> ContainerState {
        match self.state().containers.get(id) {
            Some(c) if c.running => ContainerState::Running,
            Some(_) => ContainerState::Stopped,
            None => ContainerState::NotFound,
        }
    }

    fn execute(
        &self,
        id: &str,
        command: &str,
        _workdir: Option<&str>,
        _env: &[(String, String)],
        _timeout: Option<Duration>,
    ) -> ExecOutput {
        let mut state = self.state();
        state.backend_commands.push(command.to_string());
        if state.containers.contains_key(id) {
            ExecOutput::ok("")
        } else {
            ExecOutput::new(1, "", format!("No such container: {}", id))
        }
    }

    fn copy_to(&self, id: &str, local: &Path, remote: &str, flatten: bool) -> Result<()> {
        let mut state = self.state();
        state.copies.push(CopyCall {
            source: local.to_path_buf(),
            destination: remote.to_string(),
            flatten,
        });

        if !local.exists() {
            return Err(ContainerError::CopyFailed(format!(
                "{}: no such file or directory",
                local.display()
            )));
        }

        let mut entries = Vec::new();
        if local.is_dir() {
            let root = if flatten {
                remote.to_string()
            } else {
                join_remote(remote, &basename(&local.to_string_lossy()))
            };
            let mut found = Vec::new();
            walk(local, Path::new(""), &mut found)?;
            for (path, relative) in found {
                let key = join_remote(&root, &relative.to_string_lossy().replace('\\', "/"));
                entries.push((key, fs::read_to_string(&path).unwrap_or_default()));
            }
        } else {
            entries.push((remote.to_string(), fs::read_to_string(local)?));
        }

        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::ContainerNotFound(id.to_string()))?;
        container.files.extend(entries);
        Ok(())
    }

    fn copy_from(&self, id: &str, remote: &str, local: &Path, flatten: bool) -> Result<()> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| ContainerError::ContainerNotFound(id.to_string()))?;

        let mut matched = Vec::new();
        if let Some(content) = container.files.get(remote) {
            matched.push((local.join(basename(remote)), content.clone()));
        } else {
            let prefix = format!("{}/", remote.trim_end_matches('/'));
            for (path, content) in &container.files {
                let Some(relative) = path.strip_prefix(&prefix) else {
                    continue;
                };
                if relative.starts_with(".git/") {
                    continue;
                }
                let dest = if flatten {
                    local.join(relative)
                } else {
                    local.join(basename(remote)).join(relative)
                };
                matched.push((dest, content.clone()));
            }
        }

        if matched.is_empty() {
            return Err(ContainerError::CopyFailed(format!(
                "{}:{}: no such file or directory",
                id, remote
            )));
        }
        for (dest, content) in matched {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, content)?;
        }
        Ok(())
    }

    fn connection_params(&self, id: &str) -> Result<ConnectionParams> {
        if !self.state().containers.contains_key(id) {
            return Err(ContainerError::ContainerNotFound(id.to_string()));
        }
        Ok(ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: FAKE_SSH_PORT,
            user: "codecell".to_string(),
        })
    }

    fn get_logs(&self, id: &str, tail: Option<usize>) -> Result<String> {
        if !self.state().containers.contains_key(id) {
            return Ok(String::new());
        }
        let lines = ["Server listening on 0.0.0.0 port 22.", "Accepted publickey for codecell"];
        let skip = tail.map(|n| lines.len().saturating_sub(n)).unwrap_or(0);
        Ok(lines[skip..].iter().map(|l| format!("{}\n", l)).collect())
    }

    fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self
            .state()
            .containers
            .iter()
            .map(|(id, c)| InstanceInfo {
                id: id.clone(),
                name: format!("codecell-{}", id),
                status: if c.running { "running" } else { "created" }.to_string(),
                workspace: "fake".to_string(),
            })
            .collect())
    }
}

struct FakeProvider {
    state: Arc<Mutex<RuntimeState>>,
}

impl TransportProvider for FakeProvider {
    fn key_pair(&self, keys_dir: &Path, name: &str) -> ssh::Result<KeyPair> {
        fs::create_dir_all(keys_dir)?;
        let private_key_path = keys_dir.join(name);
        let public_key_path = keys_dir.join(format!("{}.pub", name));
        let public_key = format!("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFAKE codecell@{}", name);
        if !private_key_path.exists() {
            fs::write(&private_key_path, "fake private key\n")?;
            fs::write(&public_key_path, format!("{}\n", public_key))?;
        }
        Ok(KeyPair {
            private_key_path,
            public_key_path,
            public_key,
        })
    }

    fn delete_key_pair(&self, keys_dir: &Path, name: &str) -> ssh::Result<bool> {
        let mut deleted = false;
        for path in [keys_dir.join(name), keys_dir.join(format!("{}.pub", name))] {
            if path.exists() {
                fs::remove_file(path)?;
                deleted = true;
            }
        }
        Ok(deleted)
    }

    fn connect(
        &self,
        _params: &ConnectionParams,
        _keys: &KeyPair,
        _timeout: Duration,
    ) -> Box<dyn Transport> {
        Box::new(FakeTransport {
            state: Arc::clone(&self.state),
        })
    }
}

/// Understands `echo`, `ls <dir>` and `cat <file>` against the container's
/// file map; everything else succeeds silently unless scripted.
struct FakeTransport {
    state: Arc<Mutex<RuntimeState>>,
}

fn unquote(token: &str) -> String {
    token.trim().trim_matches('\'').to_string()
}

fn absolute(workdir: Option<&str>, path: &str) -> String {
    match workdir {
        Some(dir) if !path.starts_with('/') => join_remote(dir, path),
        _ => path.to_string(),
    }
}

impl Transport for FakeTransport {
    fn execute(
        &self,
        command: &str,
        workdir: Option<&str>,
        _env: &[(String, String)],
        _timeout: Option<Duration>,
    ) -> ExecOutput {
        let mut state = lock(&self.state);
        state.transport_commands.push(command.to_string());
        if !state.reachable {
            return ExecOutput::failure("ssh: connect to host 127.0.0.1 port 2222: Connection refused");
        }
        if let Some(output) = state.take_script(command) {
            return output;
        }
        let Some(container) = state.running() else {
            return ExecOutput::failure("Connection closed by remote host");
        };

        if let Some(text) = command.strip_prefix("echo ") {
            return ExecOutput::ok(format!("{}\n", unquote(text)));
        }
        if let Some(path) = command.strip_prefix("cat ") {
            let path = absolute(workdir, &unquote(path));
            return match container.files.get(&path) {
                Some(content) => ExecOutput::ok(content.clone()),
                None => ExecOutput::new(1, "", format!("cat: {}: No such file or directory", path)),
            };
        }
        if command == "ls" || command.starts_with("ls ") {
            let dir = command
                .strip_prefix("ls")
                .map(unquote)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| workdir.unwrap_or("/").to_string());
            let prefix = format!("{}/", absolute(workdir, &dir).trim_end_matches('/'));
            let names: BTreeSet<String> = container
                .files
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .filter_map(|rest| rest.split('/').next())
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                return ExecOutput::new(2, "", format!("ls: cannot access '{}'", dir));
            }
            let listing: Vec<String> = names.into_iter().collect();
            return ExecOutput::ok(format!("{}\n", listing.join("\n")));
        }
        ExecOutput::ok("")
    }

    fn copy_to(&self, local: &Path, remote: &str, _recursive: bool) -> bool {
        let Ok(content) = fs::read_to_string(local) else {
            return false;
        };
        lock(&self.state)
            .running()
            .map(|c| c.files.insert(remote.to_string(), content))
            .is_some()
    }

    fn copy_from(&self, remote: &str, local: &Path, _recursive: bool) -> bool {
        let content = lock(&self.state)
            .running()
            .and_then(|c| c.files.get(remote).cloned());
        match content {
            Some(content) => fs::write(local, content).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn started(runtime: &FakeRuntime) -> (Box<dyn ContainerBackend>, String) {
        let backend = runtime.backend();
        let image = backend.build(None).unwrap();
        let id = backend.create(&image).unwrap();
        backend.start(&id).unwrap();
        (backend, id)
    }

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let proj = tmp.path().join("proj");
        fs::create_dir_all(proj.join("sub")).unwrap();
        fs::write(proj.join("a.py"), "A").unwrap();
        fs::write(proj.join("sub/b.py"), "B").unwrap();
        tmp
    }

    #[test]
    fn test_flatten_copy_maps_contents_onto_destination() {
        let runtime = FakeRuntime::new();
        let (backend, id) = started(&runtime);
        let tmp = project();

        backend
            .copy_to(&id, &tmp.path().join("proj"), "/workspace", true)
            .unwrap();
        assert_eq!(runtime.files(), vec!["/workspace/a.py", "/workspace/sub/b.py"]);
    }

    #[test]
    fn test_nested_copy_keeps_directory_name() {
        let runtime = FakeRuntime::new();
        let (backend, id) = started(&runtime);
        let tmp = project();

        backend
            .copy_to(&id, &tmp.path().join("proj"), "/workspace", false)
            .unwrap();
        assert!(runtime.file("/workspace/proj/a.py").is_some());
    }

    #[test]
    fn test_stop_discards_files() {
        let runtime = FakeRuntime::new();
        let (backend, id) = started(&runtime);
        runtime.write_file("/workspace/x", "1");
        backend.stop(&id, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.get_state(&id), ContainerState::NotFound);
        assert!(runtime.files().is_empty());
    }

    #[test]
    fn test_transport_ls_and_cat() {
        let runtime = FakeRuntime::new();
        let _started = started(&runtime);
        runtime.write_file("/workspace/README.md", "hi");
        runtime.write_file("/workspace/sub/b.py", "B");

        let tmp = TempDir::new().unwrap();
        let provider = runtime.provider();
        let keys = provider.key_pair(tmp.path(), "proj").unwrap();
        let params = ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: FAKE_SSH_PORT,
            user: "codecell".to_string(),
        };
        let transport = provider.connect(&params, &keys, Duration::from_secs(1));

        let ls = transport.execute("ls /workspace", None, &[], None);
        assert_eq!(ls.stdout, "README.md\nsub\n");
        let cat = transport.execute("cat sub/b.py", Some("/workspace"), &[], None);
        assert_eq!(cat.stdout, "B");
        assert_eq!(transport.execute("cat nope", Some("/workspace"), &[], None).exit_code, 1);

        runtime.script("git status", ExecOutput::ok(" M a.py\n"));
        assert_eq!(transport.execute("git status --porcelain", None, &[], None).stdout, " M a.py\n");
        assert_eq!(transport.execute("git status --porcelain", None, &[], None).stdout, "");
    }

    #[test]
    fn test_unreachable_transport() {
        let runtime = FakeRuntime::new();
        let _started = started(&runtime);
        runtime.set_reachable(false);

        let tmp = TempDir::new().unwrap();
        let provider = runtime.provider();
        let keys = provider.key_pair(tmp.path(), "proj").unwrap();
        let params = ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: FAKE_SSH_PORT,
            user: "codecell".to_string(),
        };
        let transport = provider.connect(&params, &keys, Duration::from_secs(1));
        assert!(!transport.wait_for_ready(2, Duration::from_millis(1)));
    }
}

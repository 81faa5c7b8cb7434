//! Scoped acquisition: start, work, sync back, always stop.

use std::path::Path;
use std::time::Duration;

use crate::agents::{AgentOptions, AgentResult};
use crate::process::ExecOutput;

use super::config::WorkspaceConfig;
use super::error::Result;
use super::workspace::{load_config, Workspace, DEFAULT_STOP_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceOptions {
    /// Copy the target into the container after start.
    pub auto_sync: bool,
    /// Copy the work directory back when the body succeeds.
    pub sync_back: bool,
    /// Destroy instead of stop on the way out.
    pub auto_destroy: bool,
    pub language: Option<String>,
    pub name: Option<String>,
    pub stop_timeout: Duration,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_back: true,
            auto_destroy: false,
            language: None,
            name: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl WorkspaceOptions {
    fn apply(&self, mut config: WorkspaceConfig) -> WorkspaceConfig {
        if let Some(name) = &self.name {
            config = config.with_name(name);
        }
        if let Some(language) = &self.language {
            config = config.with_language(language);
        }
        config
    }
}

/// Open the workspace for `target` with `options` applied to its config.
pub fn open_workspace(target: &Path, options: &WorkspaceOptions) -> Result<Workspace> {
    Workspace::with_config(options.apply(load_config(target)?))
}

/// Run `f` against a started workspace for `target`.
///
/// The workspace is stopped (or destroyed with `auto_destroy`) on every exit
/// path. Syncing back only happens when `f` succeeds.
pub fn with_workspace<T, F>(target: &Path, options: WorkspaceOptions, f: F) -> Result<T>
where
    F: FnOnce(&mut Workspace) -> Result<T>,
{
    let ws = open_workspace(target, &options)?;
    scoped(ws, &options, f)
}

/// [`with_workspace`] for an already constructed controller.
pub fn scoped<T, F>(mut ws: Workspace, options: &WorkspaceOptions, f: F) -> Result<T>
where
    F: FnOnce(&mut Workspace) -> Result<T>,
{
    let result = enter(&mut ws, options, f);

    let teardown = if options.auto_destroy {
        ws.destroy()
    } else {
        ws.stop(options.stop_timeout)
    };

    match (result, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), teardown) => {
            if let Err(te) = teardown {
                tracing::warn!("Teardown of '{}' failed: {}", ws.name(), te);
            }
            Err(e)
        }
    }
}

fn enter<T, F>(ws: &mut Workspace, options: &WorkspaceOptions, f: F) -> Result<T>
where
    F: FnOnce(&mut Workspace) -> Result<T>,
{
    ws.start()?;
    if options.auto_sync {
        ws.sync_to_container(true)?;
    }
    let value = f(ws)?;
    if options.sync_back {
        ws.sync_from_container(None, &[])?;
    }
    Ok(value)
}

/// One-shot command in a fresh workspace.
pub fn run(target: &Path, command: &str, timeout: Option<Duration>) -> Result<ExecOutput> {
    let options = WorkspaceOptions {
        sync_back: false,
        ..Default::default()
    };
    with_workspace(target, options, |ws| ws.execute(command, None, &[], timeout))
}

/// One-shot agent run. With `output`, the agent is asked to write that file
/// and only that file is copied back; otherwise the whole work directory is.
pub fn generate(
    target: &Path,
    prompt: &str,
    agent: &str,
    output: Option<&str>,
) -> Result<AgentResult> {
    let options = WorkspaceOptions {
        sync_back: output.is_none(),
        ..Default::default()
    };
    with_workspace(target, options, |ws| generate_in(ws, prompt, agent, output))
}

pub(crate) fn generate_in(
    ws: &mut Workspace,
    prompt: &str,
    agent: &str,
    output: Option<&str>,
) -> Result<AgentResult> {
    let prompt = match output {
        Some(file) => format!("{}\n\nWrite the result to {}.", prompt, file),
        None => prompt.to_string(),
    };
    let result = ws.run_agent(agent, &prompt, None, &[], &AgentOptions::default())?;

    if let Some(file) = output {
        if result.success {
            ws.sync_from_container(None, &[file.to_string()])?;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use crate::workspace::{WorkspaceError, WorkspaceState};
    use std::fs;
    use tempfile::TempDir;

    fn fake_workspace(tmp: &TempDir, runtime: &FakeRuntime) -> Workspace {
        let target = tmp.path().join("proj");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("main.py"), "print('hi')\n").unwrap();
        let mut config = WorkspaceConfig::new(&target)
            .unwrap()
            .with_workspace_dir(tmp.path().join("ws"));
        config.ssh.ready_retries = 1;
        config.git.auto_init = false;
        Workspace::with_parts(config, runtime.backend(), runtime.provider()).unwrap()
    }

    #[test]
    fn test_scoped_syncs_both_ways_and_stops() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        let ws = fake_workspace(&tmp, &runtime);

        let listing = scoped(ws, &WorkspaceOptions::default(), |ws| {
            assert!(runtime.write_file("/workspace/out.txt", "generated"));
            ws.execute("ls /workspace", None, &[], None)
        })
        .unwrap();

        assert!(listing.stdout.contains("main.py"));
        assert_eq!(
            fs::read_to_string(tmp.path().join("proj/out.txt")).unwrap(),
            "generated"
        );
        assert!(runtime.running_containers().is_empty());
    }

    #[test]
    fn test_scoped_skips_sync_back_on_error() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        let ws = fake_workspace(&tmp, &runtime);

        let result: Result<()> = scoped(ws, &WorkspaceOptions::default(), |_| {
            runtime.write_file("/workspace/partial.txt", "x");
            Err(WorkspaceError::Configuration("boom".to_string()))
        });

        assert!(matches!(result, Err(WorkspaceError::Configuration(_))));
        assert!(!tmp.path().join("proj/partial.txt").exists());
        assert!(runtime.running_containers().is_empty());
    }

    #[test]
    fn test_scoped_auto_destroy_removes_workspace_dir() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        let ws = fake_workspace(&tmp, &runtime);
        let options = WorkspaceOptions {
            auto_destroy: true,
            sync_back: false,
            ..Default::default()
        };

        let state = scoped(ws, &options, |ws| Ok(ws.status())).unwrap();
        assert_eq!(state, WorkspaceState::Started);
        assert!(!tmp.path().join("ws").exists());
    }

    #[test]
    fn test_scoped_failed_start_still_tears_down() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        runtime.fail_builds(true);
        let ws = fake_workspace(&tmp, &runtime);

        let result = scoped(ws, &WorkspaceOptions::default(), |_| Ok(()));
        assert!(matches!(result, Err(WorkspaceError::Container(_))));
    }

    #[test]
    fn test_generate_in_copies_only_output() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::new();
        let mut ws = fake_workspace(&tmp, &runtime);
        ws.start().unwrap();
        runtime.write_file("/workspace/fib.py", "def fib(n): ...\n");
        runtime.write_file("/workspace/scratch.log", "noise");

        let result = generate_in(&mut ws, "write fib", "claude", Some("fib.py")).unwrap();
        assert!(result.success);
        assert!(tmp.path().join("proj/fib.py").exists());
        assert!(!tmp.path().join("proj/scratch.log").exists());

        let commands = runtime.transport_commands();
        assert!(commands
            .iter()
            .any(|c| c.starts_with("claude") && c.contains("Write the result to fib.py.")));
    }

    #[test]
    fn test_options_apply() {
        let tmp = TempDir::new().unwrap();
        let config = WorkspaceConfig::new(tmp.path()).unwrap();
        let options = WorkspaceOptions {
            name: Some("demo".to_string()),
            language: Some("rust".to_string()),
            ..Default::default()
        };
        let config = options.apply(config);
        assert_eq!(config.name, "demo");
        assert_eq!(config.language.as_deref(), Some("rust"));
    }
}

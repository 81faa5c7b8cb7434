//! Per-target commands: start, stop, destroy, exec, sync, agent and git.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::agents::{AgentOptions, PermissionMode};
use crate::workspace::{open_workspace, Workspace, WorkspaceOptions};

#[derive(Args)]
pub struct TargetArgs {
    /// File or directory the workspace is for
    #[arg(default_value = ".")]
    pub target: PathBuf,
}

#[derive(Args)]
pub struct StartArgs {
    /// File or directory to work on
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Language toolchain to install (python, nodejs, go, rust, java)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Workspace name (defaults to the target's file name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Dockerfile to build instead of the generated one
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Don't copy the target into the container
    #[arg(long)]
    pub no_sync: bool,
}

#[derive(Args)]
pub struct StopArgs {
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Seconds to wait before the container is killed
    #[arg(short, long, default_value_t = 10)]
    pub timeout: u64,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[arg(default_value = ".")]
    pub target: PathBuf,
}

#[derive(Args)]
pub struct ExecArgs {
    pub target: PathBuf,

    /// Working directory inside the container
    #[arg(short = 'C', long)]
    pub workdir: Option<String>,

    /// Seconds before the command is abandoned
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Command to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args)]
pub struct SyncArgs {
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Copy from the container back to the host
    #[arg(long)]
    pub from: bool,

    /// Host directory to copy into (with --from)
    #[arg(long, requires = "from")]
    pub dest: Option<PathBuf>,

    /// Only these files (relative to the work directory with --from,
    /// host paths otherwise)
    #[arg(short, long = "file")]
    pub files: Vec<String>,
}

#[derive(Args)]
pub struct AgentArgs {
    pub target: PathBuf,

    /// Prompt for the agent
    pub prompt: String,

    /// Agent to run
    #[arg(short, long, default_value = "claude")]
    pub agent: String,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Permission mode (default, acceptEdits, bypassPermissions)
    #[arg(long)]
    pub permission_mode: Option<PermissionMode>,

    /// Files handed to the agent as context
    #[arg(long = "context")]
    pub context_files: Vec<String>,

    /// Seconds before the agent is abandoned
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct LogArgs {
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Number of commits to show
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,
}

#[derive(Args)]
pub struct CommitArgs {
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Commit message
    #[arg(short, long)]
    pub message: Option<String>,
}

#[derive(Args)]
pub struct RollbackArgs {
    pub target: PathBuf,

    /// Commit to reset to
    pub reference: String,

    /// Discard working tree changes too
    #[arg(long)]
    pub hard: bool,
}

/// Reconnect to the running container for `target`, or fail with a hint.
fn attached(target: &Path) -> Result<Workspace> {
    let mut ws = Workspace::new(target)?;
    if !ws.attach()? {
        bail!(
            "No running workspace for {}\nStart it with: codecell start {}",
            ws.config().target_path.display(),
            target.display()
        );
    }
    Ok(ws)
}

/// A single argument is taken as a shell snippet; several are quoted
/// individually.
fn command_line(args: &[String]) -> String {
    match args {
        [single] => single.clone(),
        _ => args
            .iter()
            .map(|a| crate::shell::quote(a))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Container path a host file lands at when synced on its own.
fn remote_path_for(ws: &Workspace, local: &Path) -> Result<String> {
    let config = ws.config();
    let local = std::fs::canonicalize(local)
        .with_context(|| format!("Cannot sync {}", local.display()))?;
    let work_dir = config.docker.work_dir.trim_end_matches('/');

    if let Ok(rel) = local.strip_prefix(&config.target_path) {
        if !rel.as_os_str().is_empty() {
            return Ok(format!("{}/{}", work_dir, rel.to_string_lossy()));
        }
    }
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(format!("{}/{}", work_dir, name))
}

pub fn start(args: StartArgs) -> Result<()> {
    let options = WorkspaceOptions {
        language: args.language,
        name: args.name,
        ..Default::default()
    };
    let mut ws = open_workspace(&args.target, &options)?;

    let dockerfile = match &args.dockerfile {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read {}", path.display()))?,
        ),
        None => None,
    };

    let id = ws.start_with_dockerfile(dockerfile.as_deref())?;
    if !args.no_sync {
        ws.sync_to_container(true)?;
    }

    println!("✓ Started workspace: {}", ws.name());
    println!("  Target:    {}", ws.config().target_path.display());
    println!("  Container: {}", super::truncate(&id, 12));
    println!("  Work dir:  {}", ws.config().docker.work_dir);
    let ssh = &ws.config().ssh;
    println!("  SSH:       {}@{}:{}", ssh.username, ssh.host, ssh.port);
    Ok(())
}

pub fn stop(args: StopArgs) -> Result<()> {
    let mut ws = Workspace::new(&args.target)?;
    if !ws.attach()? {
        println!("Workspace '{}' is not running.", ws.name());
        return Ok(());
    }
    ws.stop(Duration::from_secs(args.timeout))?;
    println!("✓ Stopped workspace: {}", ws.name());
    Ok(())
}

pub fn destroy(args: DestroyArgs) -> Result<()> {
    let mut ws = Workspace::new(&args.target)?;
    let name = ws.name().to_string();
    ws.destroy()?;
    println!("✓ Destroyed workspace: {}", name);
    Ok(())
}

/// Returns the command's exit code.
pub fn exec(args: ExecArgs) -> Result<i32> {
    let ws = attached(&args.target)?;
    let command = command_line(&args.command);
    let output = ws.execute(
        &command,
        args.workdir.as_deref(),
        &[],
        args.timeout.map(Duration::from_secs),
    )?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(output.exit_code)
}

pub fn sync(args: SyncArgs) -> Result<()> {
    let mut ws = attached(&args.target)?;

    if args.from {
        ws.sync_from_container(args.dest.as_deref(), &args.files)?;
        let dest = args
            .dest
            .unwrap_or_else(|| ws.config().target_path.clone());
        println!("✓ Synced from container to {}", dest.display());
        return Ok(());
    }

    if args.files.is_empty() {
        ws.sync_to_container(true)?;
        println!("✓ Synced {} to container", ws.config().target_path.display());
        return Ok(());
    }

    for file in &args.files {
        let local = PathBuf::from(file);
        let remote = remote_path_for(&ws, &local)?;
        ws.copy_to_container(&local, &remote, true)?;
        println!("✓ {} -> {}", local.display(), remote);
    }
    Ok(())
}

pub fn prune(args: TargetArgs) -> Result<()> {
    let mut ws = Workspace::new(&args.target)?;
    ws.initialize()?;
    let removed = ws.prune_synced_files()?;
    if removed.is_empty() {
        println!("Nothing to prune.");
    } else {
        for path in &removed {
            println!("  - {}", path.display());
        }
        println!("✓ Pruned {} sync record(s)", removed.len());
    }
    Ok(())
}

/// Returns the agent's exit code.
pub fn agent(args: AgentArgs) -> Result<i32> {
    let mut ws = attached(&args.target)?;
    let options = AgentOptions {
        model: args.model,
        permission_mode: args.permission_mode,
        timeout: args.timeout.map(Duration::from_secs),
        ..Default::default()
    };

    let result = ws.run_agent(&args.agent, &args.prompt, None, &args.context_files, &options)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }
    Ok(result.exit_code)
}

pub fn log(args: LogArgs) -> Result<()> {
    let mut ws = attached(&args.target)?;
    let commits = ws.list_commits(args.count)?;
    if commits.is_empty() {
        println!("No commits yet.");
        return Ok(());
    }
    for commit in &commits {
        println!(
            "{} {} {}",
            commit.short_hash,
            super::truncate(&commit.timestamp, 19),
            commit.message
        );
    }
    Ok(())
}

pub fn commit(args: CommitArgs) -> Result<()> {
    let mut ws = attached(&args.target)?;
    match ws.commit_changes(args.message.as_deref())? {
        Some(hash) => println!("✓ Committed {}", super::truncate(&hash, 12)),
        None => println!("Nothing to commit."),
    }
    Ok(())
}

pub fn rollback(args: RollbackArgs) -> Result<()> {
    let mut ws = attached(&args.target)?;
    if !ws.rollback_to(&args.reference, args.hard)? {
        bail!("Could not reset to {}", args.reference);
    }
    println!("✓ Reset to {}", args.reference);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use crate::workspace::WorkspaceConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_command_line() {
        assert_eq!(command_line(&["ls | wc -l".to_string()]), "ls | wc -l");
        assert_eq!(
            command_line(&["echo".to_string(), "a b".to_string()]),
            "echo 'a b'"
        );
    }

    #[test]
    fn test_remote_path_for_file_under_target() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("proj");
        fs::create_dir_all(target.join("sub")).unwrap();
        fs::write(target.join("sub/b.py"), "").unwrap();
        fs::write(tmp.path().join("outside.txt"), "").unwrap();

        let runtime = FakeRuntime::new();
        let config = WorkspaceConfig::new(&target)
            .unwrap()
            .with_workspace_dir(tmp.path().join("ws"));
        let ws = Workspace::with_parts(config, runtime.backend(), runtime.provider()).unwrap();

        assert_eq!(
            remote_path_for(&ws, &target.join("sub/b.py")).unwrap(),
            "/workspace/sub/b.py"
        );
        assert_eq!(
            remote_path_for(&ws, &tmp.path().join("outside.txt")).unwrap(),
            "/workspace/outside.txt"
        );
        assert!(remote_path_for(&ws, &tmp.path().join("missing")).is_err());
    }
}

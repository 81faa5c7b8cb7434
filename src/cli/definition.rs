//! Top-level clap definitions for `codecell`

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use super::cleanup::CleanupArgs;
use super::list::ListArgs;
use super::templates::TemplatesArgs;
use super::workspace::{
    AgentArgs, CommitArgs, DestroyArgs, ExecArgs, LogArgs, RollbackArgs, StartArgs, StopArgs,
    SyncArgs, TargetArgs,
};

#[derive(Parser)]
#[command(name = "codecell")]
#[command(about = "Disposable SSH-reachable containers for AI coding agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List workspaces and the containers codecell manages
    #[command(alias = "ls")]
    List(ListArgs),

    /// Build, start and connect to the container for a target
    Start(StartArgs),

    /// Stop a target's container (the workspace record is kept)
    Stop(StopArgs),

    /// Remove a target's container, keys and workspace record
    #[command(alias = "rm")]
    Destroy(DestroyArgs),

    /// Run a command inside a running workspace
    Exec(ExecArgs),

    /// Copy files between the host and a running workspace
    Sync(SyncArgs),

    /// Forget synced files whose host source no longer exists
    Prune(TargetArgs),

    /// Run a coding agent inside a running workspace
    Agent(AgentArgs),

    /// Show commits made inside the container
    Log(LogArgs),

    /// Commit all changes inside the container
    Commit(CommitArgs),

    /// Reset the container's repository to a commit
    Rollback(RollbackArgs),

    /// Remove workspaces whose target no longer exists
    Cleanup(CleanupArgs),

    /// Write a starter Dockerfile and .gitignore into a directory
    Templates(TemplatesArgs),

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_keeps_trailing_command() {
        let cli = Cli::parse_from(["codecell", "exec", "./proj", "--", "ls", "-la", "/workspace"]);
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.target.to_string_lossy(), "./proj");
                assert_eq!(args.command, vec!["ls", "-la", "/workspace"]);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_sync_flags() {
        let cli = Cli::parse_from([
            "codecell", "sync", "proj", "--from", "--file", "a.py", "--file", "sub/b.py",
        ]);
        match cli.command {
            Commands::Sync(args) => {
                assert!(args.from);
                assert_eq!(args.files, vec!["a.py", "sub/b.py"]);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_rollback_hard() {
        let cli = Cli::parse_from(["codecell", "rollback", "proj", "abc123", "--hard"]);
        match cli.command {
            Commands::Rollback(args) => {
                assert_eq!(args.reference, "abc123");
                assert!(args.hard);
            }
            _ => panic!("expected rollback"),
        }
    }

    #[test]
    fn test_list_alias() {
        let cli = Cli::parse_from(["codecell", "ls", "--json"]);
        assert!(matches!(cli.command, Commands::List(_)));
    }
}

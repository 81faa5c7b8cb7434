//! codecell - Disposable SSH-reachable containers for AI coding agents

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use codecell::cli::{self, Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    if std::env::var("CODECELL_DEBUG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("codecell=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Completion { shell } => {
            generate(shell, &mut Cli::command(), "codecell", &mut std::io::stdout());
            Ok(())
        }
        Commands::List(args) => cli::list::run(args),
        Commands::Start(args) => cli::workspace::start(args),
        Commands::Stop(args) => cli::workspace::stop(args),
        Commands::Destroy(args) => cli::workspace::destroy(args),
        Commands::Exec(args) => exit_with(cli::workspace::exec(args)?),
        Commands::Sync(args) => cli::workspace::sync(args),
        Commands::Prune(args) => cli::workspace::prune(args),
        Commands::Agent(args) => exit_with(cli::workspace::agent(args)?),
        Commands::Log(args) => cli::workspace::log(args),
        Commands::Commit(args) => cli::workspace::commit(args),
        Commands::Rollback(args) => cli::workspace::rollback(args),
        Commands::Cleanup(args) => cli::cleanup::run(args),
        Commands::Templates(args) => cli::templates::run(args),
    }
}

/// Forward a remote exit status. Transport failures (-1) become 255 like ssh.
fn exit_with(code: i32) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    std::process::exit(if code < 0 { 255 } else { code });
}

//! `codecell cleanup` command implementation

use anyhow::Result;
use clap::Args;

use crate::workspace;

#[derive(Args)]
pub struct CleanupArgs {
    /// Show what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,
}

pub fn run(args: CleanupArgs) -> Result<()> {
    let orphans = workspace::find_orphaned_workspaces()?;
    if orphans.is_empty() {
        println!("No orphaned workspaces.");
        return Ok(());
    }

    for orphan in &orphans {
        println!("  - {}", orphan.target_path.display());
    }

    if args.dry_run {
        println!("{} orphaned workspace(s) would be removed.", orphans.len());
        return Ok(());
    }

    let removed = workspace::cleanup_orphaned_workspaces()?;
    println!("✓ Removed {} orphaned workspace(s)", removed);
    if removed < orphans.len() {
        println!(
            "  {} could not be removed, run with CODECELL_DEBUG=1 for details",
            orphans.len() - removed
        );
    }
    Ok(())
}

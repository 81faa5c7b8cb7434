//! `codecell list` command implementation

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::containers::{self, Docker, InstanceInfo};
use crate::workspace::{self, DockerConfig, TargetType, WorkspaceSummary};

const TABLE_COL_TARGET: usize = 40;
const TABLE_COL_TYPE: usize = 10;
const TABLE_COL_FILES: usize = 6;
const TABLE_COL_ACCESSED: usize = 17;

#[derive(Args)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Skip querying Docker for managed containers
    #[arg(long)]
    no_containers: bool,
}

#[derive(Serialize)]
struct WorkspaceJson {
    target: String,
    target_type: TargetType,
    workspace_dir: String,
    synced_files: usize,
    orphaned: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    last_accessed: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct ListJson {
    workspaces: Vec<WorkspaceJson>,
    containers: Vec<InstanceInfo>,
}

impl From<&WorkspaceSummary> for WorkspaceJson {
    fn from(ws: &WorkspaceSummary) -> Self {
        Self {
            target: ws.target_path.display().to_string(),
            target_type: ws.target_type,
            workspace_dir: ws.workspace_dir.display().to_string(),
            synced_files: ws.synced_files,
            orphaned: ws.is_orphaned(),
            created_at: ws.created_at,
            last_accessed: ws.last_accessed,
        }
    }
}

fn print_table_header() {
    println!(
        "{:<width_target$} {:<width_type$} {:>width_files$} {:<width_accessed$} STATE",
        "TARGET",
        "TYPE",
        "FILES",
        "LAST ACCESSED",
        width_target = TABLE_COL_TARGET,
        width_type = TABLE_COL_TYPE,
        width_files = TABLE_COL_FILES,
        width_accessed = TABLE_COL_ACCESSED,
    );
    println!(
        "{}",
        "-".repeat(TABLE_COL_TARGET + TABLE_COL_TYPE + TABLE_COL_FILES + TABLE_COL_ACCESSED + 13)
    );
}

fn print_table_row(ws: &WorkspaceSummary) {
    let target = super::truncate_path(&ws.target_path.display().to_string(), TABLE_COL_TARGET);
    let target_type = match ws.target_type {
        TargetType::File => "file",
        TargetType::Directory => "directory",
    };
    let accessed = ws
        .last_accessed
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string();
    let state = if ws.is_orphaned() { "orphaned" } else { "ok" };
    println!(
        "{:<width_target$} {:<width_type$} {:>width_files$} {:<width_accessed$} {}",
        target,
        target_type,
        ws.synced_files,
        accessed,
        state,
        width_target = TABLE_COL_TARGET,
        width_type = TABLE_COL_TYPE,
        width_files = TABLE_COL_FILES,
        width_accessed = TABLE_COL_ACCESSED,
    );
}

fn managed_containers() -> Vec<InstanceInfo> {
    if !containers::is_docker_available() || !containers::is_daemon_running() {
        return Vec::new();
    }
    let docker = Docker::new("codecell", DockerConfig::default(), None);
    match containers::list_managed_instances(&docker) {
        Ok(instances) => instances,
        Err(e) => {
            tracing::warn!("Could not list containers: {}", e);
            Vec::new()
        }
    }
}

pub fn run(args: ListArgs) -> Result<()> {
    let workspaces = workspace::list_workspaces()?;
    let containers = if args.no_containers {
        Vec::new()
    } else {
        managed_containers()
    };

    if args.json {
        let output = ListJson {
            workspaces: workspaces.iter().map(WorkspaceJson::from).collect(),
            containers,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if workspaces.is_empty() {
        println!("No workspaces found.");
        println!("Start one with: codecell start <path>");
    } else {
        print_table_header();
        for ws in &workspaces {
            print_table_row(ws);
        }
        println!();
        println!("Total: {} workspaces", workspaces.len());
    }

    if !containers.is_empty() {
        println!();
        println!("Containers:");
        for c in &containers {
            println!(
                "  {:<30} {:<12} {}",
                super::truncate(&c.name, 30),
                super::truncate(&c.status, 12),
                c.workspace
            );
        }
    }

    Ok(())
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "po")]
#[command(version, about = "Build, run and reclaim website preview containers", long_about = None)]
pub struct Cli {
    /// Directory holding state, config and materialized projects
    #[arg(long, env = "PO_WORKSPACE", default_value = ".preview-orchestrator", global = true)]
    pub workspace: PathBuf,

    /// Config file to use instead of <workspace>/preview-orchestrator.yaml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Skip repairing drifted deployment records on startup
    #[arg(long, global = true)]
    pub no_reconcile: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register or list generated projects
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Materialize, build and start a project
    Deploy { project_id: i64 },
    /// Start a project from its existing image, building only if missing
    Start { project_id: i64 },
    /// Materialize and build a project's image without starting it
    Build { project_id: i64 },
    /// Show status, health and resource usage of a deployment
    Status { deployment_id: i64 },
    /// Show recent container output
    Logs {
        deployment_id: i64,

        /// Number of lines from the end
        #[arg(short = 'n', long, default_value_t = 100)]
        tail: usize,
    },
    /// Stop a deployment, keeping its container
    Stop { deployment_id: i64 },
    /// Stop and start a deployment again
    Restart { deployment_id: i64 },
    /// List every deployment record
    #[command(visible_alias = "ls")]
    List,
    /// List running orchestrator-owned containers as the engine reports them
    Running,
    /// Repair records whose container vanished or exited
    Reconcile,
    /// Remove containers, images, files and records
    #[command(subcommand)]
    Cleanup(CleanupCommand),
    /// List supported stacks
    Stacks,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Store a project from a directory of generated files
    Add {
        name: String,

        /// Stack label, e.g. "vite-react", "next", "static"
        #[arg(short, long, default_value = "vite-react")]
        stack: String,

        /// Directory to read the files from
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// List stored projects
    #[command(visible_alias = "ls")]
    List,
    /// Forget a project. Its deployments must be cleaned up first
    #[command(visible_alias = "rm")]
    Remove { project_id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum CleanupCommand {
    /// One deployment; the image and files go with the project's last one
    Deployment {
        deployment_id: i64,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Every deployment of a project
    Project {
        project_id: i64,

        #[arg(long)]
        dry_run: bool,
    },
    /// Everything the orchestrator owns, host-wide
    Reset {
        /// Required unless --dry-run is given
        #[arg(long)]
        confirm: bool,

        #[arg(long)]
        dry_run: bool,
    },
}

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use po_cli::cli::{CleanupCommand, Cli, Command, ProjectCommand};
use po_cli::project_files::read_project_dir;
use po_cli::render;
use po_core::models::{ActionResult, CleanupScope, Project};
use po_core::services::config_loader;
use po_core::services::deployer::Deployer;
use po_core::services::docker::DockerCli;
use po_core::services::orchestrator::Orchestrator;
use po_core::services::stack_registry::resolve_stack;
use po_core::services::state::StateStore;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let code = {
        // Held until every log line has been flushed.
        let _guard = init_logging(cli.debug, cli.log_file.as_deref())?;
        run(cli).await?
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Log to stderr, or through a non-blocking file writer with `--log-file`.
/// The returned guard must outlive every log call.
fn init_logging(
    debug: bool,
    log_file: Option<&Path>,
) -> color_eyre::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("--log-file must name a file: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();

    Ok(Some(guard))
}

async fn run(cli: Cli) -> color_eyre::Result<i32> {
    let config = match &cli.config {
        Some(path) => config_loader::load_file(path, &cli.workspace)?,
        None => config_loader::load(&cli.workspace)?,
    };
    tokio::fs::create_dir_all(&config.workspace_dir)
        .await
        .wrap_err_with(|| format!("failed to create {}", config.workspace_dir.display()))?;

    let store = Arc::new(StateStore::open(config.state_file()).await?);
    let engine = Arc::new(DockerCli::new(config.timeouts));
    let orchestrator = Arc::new(Orchestrator::new(config, store.clone(), store.clone(), engine));
    let deployer = Deployer::new(orchestrator);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    if !cli.no_reconcile && touches_engine(&cli.command) {
        match deployer.reconcile().await {
            Ok(0) => {}
            Ok(repaired) => tracing::info!(repaired, "repaired drifted deployment records"),
            Err(e) => tracing::debug!(error = %e, "skipping reconcile"),
        }
    }

    let json = cli.json;
    match cli.command {
        Command::Project(ProjectCommand::Add { name, stack, dir }) => {
            let files = read_project_dir(&dir)?;
            let project = store.create_project(&name, &stack, files).await?;
            let message = format!(
                "project {} stored ({} files, {})",
                project.id,
                project.files.len(),
                resolve_stack(&project.stack_label).kind
            );
            emit(json, &ActionResult::ok(project, message.clone()), |_| {
                format!("{message}\n")
            })
        }
        Command::Project(ProjectCommand::List) => {
            let projects: Vec<Project> = store.list_projects().await;
            let message = format!("{} project(s)", projects.len());
            emit(json, &ActionResult::ok(projects, message), |p| {
                render::render_projects(p)
            })
        }
        Command::Project(ProjectCommand::Remove { project_id }) => {
            let result = ActionResult::from_result(
                store.delete_project(project_id).await.map(|()| project_id),
                format!("project {project_id} removed"),
            );
            emit(json, &result, |_| format!("{}\n", result.message))
        }
        Command::Deploy { project_id } => {
            let result = deployer.deploy(project_id, &cancel).await;
            emit(json, &result, |o| render::render_outcome(&result.message, o))
        }
        Command::Start { project_id } => {
            let result = deployer.start(project_id, &cancel).await;
            emit(json, &result, |o| render::render_outcome(&result.message, o))
        }
        Command::Build { project_id } => {
            let result = deployer.build(project_id, &cancel).await;
            emit(json, &result, |tag| format!("built {tag}\n"))
        }
        Command::Status { deployment_id } => {
            let result = deployer.get_status(deployment_id).await;
            emit(json, &result, render::render_status)
        }
        Command::Logs {
            deployment_id,
            tail,
        } => {
            let result = deployer.get_logs(deployment_id, tail).await;
            emit(json, &result, |l| {
                if l.logs.is_empty() || l.logs.ends_with('\n') {
                    l.logs.clone()
                } else {
                    format!("{}\n", l.logs)
                }
            })
        }
        Command::Stop { deployment_id } => {
            let result = deployer.stop(deployment_id).await;
            emit(json, &result, |o| render::render_outcome(&result.message, o))
        }
        Command::Restart { deployment_id } => {
            let result = deployer.restart(deployment_id, &cancel).await;
            emit(json, &result, |o| render::render_outcome(&result.message, o))
        }
        Command::List => {
            let result = deployer.list_all().await;
            emit(json, &result, |l| render::render_listing(l))
        }
        Command::Running => {
            let result = deployer.list_running().await;
            emit(json, &result, |c| render::render_running(c))
        }
        Command::Reconcile => {
            let result = ActionResult::from_result(deployer.reconcile().await, "reconciled");
            emit(json, &result, |n| format!("repaired {n} deployment record(s)\n"))
        }
        Command::Cleanup(command) => {
            let (scope, dry_run) = match command {
                CleanupCommand::Deployment {
                    deployment_id,
                    dry_run,
                } => (CleanupScope::Deployment { deployment_id }, dry_run),
                CleanupCommand::Project {
                    project_id,
                    dry_run,
                } => (CleanupScope::Project { project_id }, dry_run),
                CleanupCommand::Reset { confirm, dry_run } => {
                    (CleanupScope::FullReset { confirm }, dry_run)
                }
            };
            let result = deployer.cleanup(scope, dry_run).await;
            emit(json, &result, render::render_cleanup)
        }
        Command::Stacks => {
            print!("{}", render::render_stacks());
            Ok(0)
        }
    }
}

/// Commands that talk to the container engine. Reconcile runs before these.
fn touches_engine(command: &Command) -> bool {
    !matches!(
        command,
        Command::Project(_) | Command::Stacks | Command::Reconcile
    )
}

/// Print a result as JSON or text and return the process exit code. Data is
/// printed even on failure so partial cleanup counts stay visible.
fn emit<T: Serialize>(
    json: bool,
    result: &ActionResult<T>,
    text: impl FnOnce(&T) -> String,
) -> color_eyre::Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        if let Some(data) = &result.data {
            print!("{}", text(data));
        }
        if !result.success {
            eprintln!("{}", render::render_failure(result));
        }
    }
    Ok(if result.success { 0 } else { 1 })
}

//! Operator CLI for solverq.
//!
//! Submits input artifacts to the engine against the configured solver
//! binary and renders live progress until every task is terminal.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre};
use colored::Colorize;
use sq_core::config::load_config;
use sq_core::dispatcher::Dispatcher;
use sq_core::solver::{CommandSolver, Solver};
use sq_core::state::store::TaskStore;
use sq_core::stats::{StaticProbe, StatsAggregator};
use sq_protocol::config_models::EngineConfig;
use sq_protocol::ipc::Event;
use sq_protocol::task_models::{Priority, Task};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "solverq", about = "Queue and supervise solver runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit input files and watch them run to completion.
    Run {
        /// Engine configuration file.
        #[arg(long, default_value = "solverq.yaml")]
        config: PathBuf,

        /// Queue the submissions on the high-priority tier.
        #[arg(long)]
        high_priority: bool,

        /// Echo every solver output line, not just progress.
        #[arg(long)]
        verbose: bool,

        /// Print the final statistics snapshot as JSON.
        #[arg(long)]
        json: bool,

        /// Input artifacts to solve.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            high_priority,
            verbose,
            json,
            inputs,
        } => run(config, high_priority, verbose, json, inputs).await,
    }
}

async fn run(
    config_path: PathBuf,
    high_priority: bool,
    verbose: bool,
    json: bool,
    inputs: Vec<PathBuf>,
) -> color_eyre::Result<()> {
    let config = load_config(&config_path).await?;
    tokio::fs::create_dir_all(&config.results_dir).await?;
    tokio::fs::create_dir_all(&config.logs_dir).await?;

    let solver = Arc::new(CommandSolver::new(&config));
    if !solver.check_availability().await {
        bail!(
            "solver binary '{}' is not available",
            config.solver_executable.display()
        );
    }

    let (events_tx, mut events_rx) = mpsc::channel(1024);
    let store = TaskStore::new();
    let config = Arc::new(config);
    let dispatcher = Dispatcher::new(store.clone(), solver, Arc::clone(&config), events_tx);

    let priority = if high_priority {
        Priority::High
    } else {
        Priority::Normal
    };
    let user_id = Uuid::new_v4();
    let mut submitted: HashSet<Uuid> = HashSet::new();
    for input in &inputs {
        let task = build_task(user_id, input, &config, priority)?;
        let id = task.id;
        let name = task.original_filename.clone();
        store.insert(task).await;
        dispatcher.submit(id).await?;
        submitted.insert(id);
        println!("{} {name}", "submitted".bold());
    }

    let mut terminal = 0usize;
    while terminal < submitted.len() {
        let Some(event) = events_rx.recv().await else {
            break;
        };
        match event {
            Event::TaskQueued { task_id } => {
                println!("{} {}", "queued   ".dimmed(), short(task_id));
            }
            Event::TaskStarted { task_id } => {
                println!("{} {}", "started  ".cyan(), short(task_id));
            }
            Event::TaskProgress {
                task_id,
                percentage,
                step,
            } => {
                let step = step.unwrap_or_default();
                println!(
                    "{} {} {percentage:5.1}% {step}",
                    "progress ".blue(),
                    short(task_id)
                );
            }
            Event::TaskLogChunk { task_id, content } => {
                if verbose {
                    println!("{} {} {content}", "log      ".dimmed(), short(task_id));
                }
            }
            Event::TaskCompleted {
                task_id,
                result_filename,
            } => {
                terminal += 1;
                println!(
                    "{} {} -> {result_filename}",
                    "completed".green().bold(),
                    short(task_id)
                );
            }
            Event::TaskFailed { task_id, error } => {
                terminal += 1;
                println!("{} {} {error}", "failed   ".red().bold(), short(task_id));
            }
            Event::TaskCancelled { task_id } => {
                terminal += 1;
                println!("{} {}", "cancelled".yellow(), short(task_id));
            }
        }
    }

    let aggregator = StatsAggregator::new(store, Arc::new(StaticProbe::default()));
    let snapshot = aggregator.snapshot().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    println!(
        "\n{} completed today: {}, failed today: {}, avg execution: {}",
        "summary".bold(),
        snapshot.completed_tasks_today,
        snapshot.failed_tasks_today,
        snapshot
            .avg_execution_time
            .map(|s| format!("{s:.1}s"))
            .unwrap_or_else(|| "n/a".to_string()),
    );
    Ok(())
}

fn build_task(
    user_id: Uuid,
    input: &Path,
    config: &EngineConfig,
    priority: Priority,
) -> color_eyre::Result<Task> {
    if !input.exists() {
        bail!("input file '{}' does not exist", input.display());
    }
    let file_name = input
        .file_name()
        .ok_or_else(|| eyre!("input path '{}' has no file name", input.display()))?
        .to_string_lossy()
        .into_owned();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.clone());
    let output_name = match input.extension() {
        Some(ext) => format!("{stem}{}.{}", config.result_suffix, ext.to_string_lossy()),
        None => format!("{stem}{}", config.result_suffix),
    };
    Ok(Task::new(
        user_id,
        file_name.clone(),
        file_name,
        input.to_path_buf(),
        config.results_dir.join(output_name),
        priority,
    ))
}

fn short(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quarry_core::{CancellationToken, TaskId, TaskStatus};
use quarry_store::{JsonTaskStore, TaskTracker};

mod commands;
mod fetch;

use commands::{
    cache_clear, cache_size, cancel_task, list_resumable, list_tasks, run_resume, run_update,
    show_task,
};

#[derive(Parser, Debug)]
#[command(name = "quarry", version)]
#[command(about = "Quarry - resumable task tracking for scrape and dataset pipelines")]
struct Cli {
    /// Path to the task store file (default: $QUARRY_TASK_STORE, then the
    /// system temp directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update an existing dataset non-interactively (scheduler entry point)
    Update {
        /// URL to fetch
        #[arg(long)]
        url: String,
        /// Dataset name to update
        #[arg(long)]
        dataset_name: String,
        /// Follow links on the root page one level deep
        #[arg(long)]
        recursive: bool,
        /// Existing task ID to track under (a new task is created otherwise)
        #[arg(long)]
        task_id: Option<TaskId>,
        /// Directory page records are written to
        #[arg(long, default_value = "datasets")]
        output_dir: PathBuf,
    },
    /// List interrupted tasks, or continue one under its existing ID
    Resume {
        /// Task ID to continue
        #[arg(long)]
        task_id: Option<TaskId>,
        /// Directory page records are written to
        #[arg(long, default_value = "datasets")]
        output_dir: PathBuf,
    },
    /// Inspect tracked tasks
    Tasks {
        #[command(subcommand)]
        tasks_command: TasksCommands,
    },
    /// Task cache administration
    Cache {
        #[command(subcommand)]
        cache_command: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TasksCommands {
    /// List tasks, newest first
    List {
        /// Only tasks in this status (queued, running, completed, failed,
        /// cancelled)
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only tasks of this type
        #[arg(long = "type")]
        kind: Option<String>,
        /// Maximum number of tasks shown
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one task record as JSON
    Show {
        /// Task ID
        id: TaskId,
    },
    /// Cancel a queued or running task
    Cancel {
        /// Task ID
        id: TaskId,
    },
    /// List tasks that can be resumed
    Resumable,
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Report the on-disk footprint of the task store
    Size,
    /// Delete all task records and temp artifacts
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn store_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| std::env::var_os("QUARRY_TASK_STORE").map(PathBuf::from))
        .unwrap_or_else(JsonTaskStore::default_path)
}

/// Cancel all in-flight work on SIGINT/SIGTERM; long-running loops observe
/// the token at their next poll.
fn install_interrupt_handler(root: &CancellationToken) {
    let token = root.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), cancelling operations");
            },
            _ = terminate => {
                tracing::info!("Received SIGTERM, cancelling operations");
            },
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter, // fallback to default if parsing fails
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .try_init();

    let cli = Cli::parse();
    let tracker = TaskTracker::open(store_path(cli.store));

    let code = match cli.command {
        Commands::Update {
            url,
            dataset_name,
            recursive,
            task_id,
            output_dir,
        } => {
            let cancellation = CancellationToken::new();
            install_interrupt_handler(&cancellation);
            run_update(
                tracker,
                cancellation,
                url,
                dataset_name,
                recursive,
                task_id,
                output_dir,
            )
            .await
        }
        Commands::Resume {
            task_id,
            output_dir,
        } => {
            let cancellation = CancellationToken::new();
            install_interrupt_handler(&cancellation);
            run_resume(tracker, cancellation, task_id, output_dir).await
        }
        Commands::Tasks { tasks_command } => match tasks_command {
            TasksCommands::List {
                status,
                kind,
                limit,
            } => list_tasks(&tracker, status, kind, limit),
            TasksCommands::Show { id } => show_task(&tracker, &id),
            TasksCommands::Cancel { id } => cancel_task(&tracker, &id),
            TasksCommands::Resumable => list_resumable(&tracker),
        },
        Commands::Cache { cache_command } => match cache_command {
            CacheCommands::Size => cache_size(&tracker),
            CacheCommands::Clear { yes } => cache_clear(&tracker, yes),
        },
    };

    std::process::exit(code);
}

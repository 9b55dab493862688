//! Command handlers over the tracker.
//!
//! Exit codes follow the scheduler contract: 0 for success, 1 for failure
//! or cancellation, so cron and CI wrappers can tell the difference without
//! parsing output. User-facing lines print the stored `message` and
//! `status` fields verbatim; diagnostics go to the structured log.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use quarry_core::{
    CancellationToken, FanoutProgress, LogProgress, Task, TaskId, TaskStatus, TaskUpdate,
};
use quarry_store::{JsonTaskStore, RunOutcome, TaskFilter, TaskTracker, TrackerProgress, run_tracked};

use crate::fetch::UrlUpdateOperation;

/// One listing line: description, progress, recency.
fn task_line(index: usize, task: &Task) -> String {
    format!(
        "{}. {} ({:.0}% complete, updated {} ago) [{} / {} / {}]",
        index + 1,
        task.description,
        task.progress,
        task.updated_ago(),
        task.id,
        task.kind,
        task.status,
    )
}

fn progress_sinks(
    tracker: &TaskTracker<JsonTaskStore>,
    task_id: &TaskId,
) -> Arc<FanoutProgress> {
    Arc::new(
        FanoutProgress::new()
            .with(Arc::new(LogProgress))
            .with(Arc::new(TrackerProgress::new(tracker.clone(), task_id.clone()))),
    )
}

/// `update`: the non-interactive scheduler re-entry point.
///
/// Reuses the given task id or creates a fresh `url_update` task, then runs
/// the built-in fetcher under tracking. The caller has already installed
/// the interrupt handler on `cancellation`.
pub async fn run_update(
    tracker: TaskTracker<JsonTaskStore>,
    cancellation: CancellationToken,
    url: String,
    dataset_name: String,
    recursive: bool,
    task_id: Option<TaskId>,
    output_dir: PathBuf,
) -> i32 {
    tracing::info!(%url, %dataset_name, recursive, "Starting automatic update");

    let task_id = match task_id {
        Some(id) => id,
        None => {
            let mut params = Map::new();
            params.insert("url".to_string(), json!(url));
            params.insert("dataset_name".to_string(), json!(dataset_name));
            params.insert("recursive".to_string(), json!(recursive));
            match tracker.create_task(
                "url_update",
                params,
                format!("Updating dataset '{dataset_name}' from URL {url}"),
            ) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(error = %e, "Could not create tracking task");
                    return 1;
                }
            }
        }
    };

    run_operation(tracker, cancellation, task_id, output_dir).await
}

/// `resume`: list interrupted tasks, or continue one under its id.
pub async fn run_resume(
    tracker: TaskTracker<JsonTaskStore>,
    cancellation: CancellationToken,
    task_id: Option<TaskId>,
    output_dir: PathBuf,
) -> i32 {
    let Some(task_id) = task_id else {
        let resumable = tracker.list_resumable_tasks();
        if resumable.is_empty() {
            println!("No resumable tasks found.");
            return 0;
        }
        println!("Available tasks to resume:");
        for (i, task) in resumable.iter().enumerate() {
            println!("{}", task_line(i, task));
        }
        println!("\nRun `quarry resume --task-id <ID>` to continue one.");
        return 0;
    };

    let Some(task) = tracker.get_task(&task_id) else {
        eprintln!("No task with id {task_id}");
        return 1;
    };
    if task.is_terminal() {
        eprintln!("Task {task_id} is already {} and cannot be resumed", task.status);
        return 1;
    }
    match task.kind.as_str() {
        // The scrape flow resumes through the same fetcher.
        "url_update" | "scrape" => {}
        other => {
            eprintln!("Unsupported task type: {other}");
            return 1;
        }
    }

    println!("Resuming task {task_id}...");
    run_operation(tracker, cancellation, task_id, output_dir).await
}

async fn run_operation(
    tracker: TaskTracker<JsonTaskStore>,
    cancellation: CancellationToken,
    task_id: TaskId,
    output_dir: PathBuf,
) -> i32 {
    let checkpoint_tracker = tracker.clone();
    let checkpoint_id = task_id.clone();
    let operation = Arc::new(
        UrlUpdateOperation::new(output_dir).with_checkpoint_sink(move |value: Value| {
            checkpoint_tracker
                .update_task(&checkpoint_id, TaskUpdate::new().with_checkpoint(value));
        }),
    );
    let progress = progress_sinks(&tracker, &task_id);

    match run_tracked(&tracker, &task_id, operation, progress, &cancellation).await {
        Ok(RunOutcome::Completed(result)) => {
            tracing::info!(task_id = %task_id, "Update completed");
            println!(
                "Completed: {} pages fetched",
                result.get("fetched").and_then(Value::as_u64).unwrap_or(0)
            );
            0
        }
        Ok(RunOutcome::Failed(message)) => {
            tracing::error!(task_id = %task_id, %message, "Update failed");
            eprintln!("Failed: {message}");
            1
        }
        Ok(RunOutcome::Cancelled) => {
            tracing::info!(task_id = %task_id, "Operation cancelled by user");
            println!("Cancelled");
            1
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Update could not start");
            eprintln!("{e}");
            1
        }
    }
}

/// `tasks list`.
pub fn list_tasks(
    tracker: &TaskTracker<JsonTaskStore>,
    status: Option<TaskStatus>,
    kind: Option<String>,
    limit: usize,
) -> i32 {
    let mut filter = TaskFilter::new().with_limit(limit);
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    if let Some(kind) = kind {
        filter = filter.with_kind(kind);
    }

    let tasks = tracker.list_tasks(&filter);
    if tasks.is_empty() {
        println!("No tasks found.");
        return 0;
    }
    for (i, task) in tasks.iter().enumerate() {
        println!("{}", task_line(i, task));
    }
    0
}

/// `tasks show <ID>`: the full record as JSON.
pub fn show_task(tracker: &TaskTracker<JsonTaskStore>, task_id: &TaskId) -> i32 {
    match tracker.get_task(task_id) {
        Some(task) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&task).unwrap_or_else(|_| task.id.to_string())
            );
            0
        }
        None => {
            eprintln!("No task with id {task_id}");
            1
        }
    }
}

/// `tasks cancel <ID>`: marks intent; a live operation stops at its next
/// cancellation poll.
pub fn cancel_task(tracker: &TaskTracker<JsonTaskStore>, task_id: &TaskId) -> i32 {
    if tracker.cancel_task(task_id) {
        println!("Task {task_id} cancelled");
        0
    } else {
        eprintln!("Task {task_id} not found or already finished");
        1
    }
}

/// `tasks resumable`.
pub fn list_resumable(tracker: &TaskTracker<JsonTaskStore>) -> i32 {
    let tasks = tracker.list_resumable_tasks();
    if tasks.is_empty() {
        println!("No resumable tasks found.");
        return 0;
    }
    for (i, task) in tasks.iter().enumerate() {
        println!("{}", task_line(i, task));
    }
    0
}

/// `cache size`.
pub fn cache_size(tracker: &TaskTracker<JsonTaskStore>) -> i32 {
    println!("{:.2} MB", tracker.get_cache_size());
    0
}

/// `cache clear`: destructive, so it insists on `--yes`.
pub fn cache_clear(tracker: &TaskTracker<JsonTaskStore>, yes: bool) -> i32 {
    if !yes {
        eprintln!(
            "This deletes all task records ({:.2} MB). Re-run with --yes to confirm.",
            tracker.get_cache_size()
        );
        return 1;
    }
    if tracker.clear_cache() {
        println!("Cache cleared");
        0
    } else {
        eprintln!("Failed to clear cache");
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn task_lines_carry_the_display_fields() {
        let mut task = Task::new("url_update", Map::new(), "Updating dataset 'ds1'");
        task.progress = 40.0;

        let line = task_line(0, &task);
        assert!(line.starts_with("1. Updating dataset 'ds1' (40% complete"));
        assert!(line.contains("url_update"));
        assert!(line.contains("queued"));
    }
}

//! Tracked execution of long-running operations.
//!
//! The tracker never catches operation failures itself; that is this
//! wrapper's job. [`run_tracked`] owns the task record for the duration of
//! the run and guarantees it ends in exactly one terminal state:
//! `completed` with the operation's result, `failed` with an error payload
//! (including contained panics), or `cancelled`.

use std::sync::Arc;

use serde_json::{Map, Value};

use quarry_core::{
    CancellationToken, Operation, OperationContext, OperationError, ProgressReporter, TaskId,
    TaskStatus, TaskStore, TaskUpdate,
};

use crate::tracker::TaskTracker;

/// Why a tracked run could not start.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// No task record with the given id.
    #[error("no task with id {0}")]
    UnknownTask(TaskId),

    /// The task already reached a terminal state; resuming it would violate
    /// the one-directional lifecycle.
    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },
}

/// How a tracked run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Operation finished; the record is `completed` with this result.
    Completed(Map<String, Value>),

    /// Operation failed (or panicked); the record is `failed`.
    Failed(String),

    /// Cancellation was observed; the record is `cancelled`.
    Cancelled,
}

impl RunOutcome {
    /// Whether the run completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// Execute `operation` against the task record `task_id`.
///
/// Re-validates the task is not already terminal (resumption under an
/// existing id goes through the same gate), flips it to `running`, and runs
/// the operation on a spawned tokio task with a child cancellation token, a
/// progress reporter, and the stored params and checkpoint. A cancellation
/// token that trips before the operation returns wins over its result,
/// matching the non-interactive update flow.
pub async fn run_tracked<S: TaskStore>(
    tracker: &TaskTracker<S>,
    task_id: &TaskId,
    operation: Arc<dyn Operation>,
    progress: Arc<dyn ProgressReporter>,
    cancellation: &CancellationToken,
) -> Result<RunOutcome, RunnerError> {
    let task = tracker
        .get_task(task_id)
        .ok_or_else(|| RunnerError::UnknownTask(task_id.clone()))?;
    if task.is_terminal() {
        return Err(RunnerError::AlreadyTerminal {
            id: task_id.clone(),
            status: task.status,
        });
    }

    tracker.update_task(
        task_id,
        TaskUpdate::new()
            .with_status(TaskStatus::Running)
            .with_message(format!("Running {}", operation.kind())),
    );

    let ctx = OperationContext {
        checkpoint: task.checkpoint().cloned(),
        params: task.params,
        progress,
        cancellation: cancellation.child(),
    };
    let handle = tokio::spawn(async move { operation.run(ctx).await });

    let outcome = match handle.await {
        Ok(_) if cancellation.is_cancelled() => {
            tracker.cancel_task(task_id);
            RunOutcome::Cancelled
        }
        Ok(Ok(result)) => {
            if !tracker.complete_task(task_id, true, Some(result.clone())) {
                tracing::warn!(task_id = %task_id, "Task record changed under a finished operation");
            }
            RunOutcome::Completed(result)
        }
        Ok(Err(OperationError::Cancelled)) => {
            tracker.cancel_task(task_id);
            RunOutcome::Cancelled
        }
        Ok(Err(OperationError::Failed(message))) => {
            fail(tracker, task_id, &message);
            RunOutcome::Failed(message)
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                "operation panicked".to_string()
            } else {
                "operation aborted".to_string()
            };
            tracing::error!(task_id = %task_id, error = %join_error, "Operation did not return");
            fail(tracker, task_id, &message);
            RunOutcome::Failed(message)
        }
    };

    Ok(outcome)
}

fn fail<S: TaskStore>(tracker: &TaskTracker<S>, task_id: &TaskId, message: &str) {
    let mut result = Map::new();
    result.insert("error".to_string(), Value::String(message.to_string()));
    if !tracker.complete_task(task_id, false, Some(result)) {
        tracing::warn!(task_id = %task_id, "Task record changed under a failed operation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryTaskStore;
    use async_trait::async_trait;
    use quarry_core::NullProgress;
    use serde_json::json;

    struct ScriptedOp {
        outcome: fn(&OperationContext) -> Result<Map<String, Value>, OperationError>,
    }

    #[async_trait]
    impl Operation for ScriptedOp {
        fn kind(&self) -> &str {
            "scripted"
        }

        async fn run(&self, ctx: OperationContext) -> Result<Map<String, Value>, OperationError> {
            if ctx.cancellation.is_cancelled() {
                return Err(OperationError::Cancelled);
            }
            ctx.progress.report(50.0, Some("halfway"));
            (self.outcome)(&ctx)
        }
    }

    fn fixture() -> (TaskTracker<InMemoryTaskStore>, TaskId, CancellationToken) {
        let tracker = TaskTracker::new(InMemoryTaskStore::new());
        let id = tracker
            .create_task("scripted", Map::new(), "runner fixture")
            .unwrap();
        (tracker, id, CancellationToken::new())
    }

    #[tokio::test]
    async fn success_completes_the_record() {
        let (tracker, id, token) = fixture();
        let op = Arc::new(ScriptedOp {
            outcome: |_| {
                let mut result = Map::new();
                result.insert("pages".to_string(), json!(12));
                Ok(result)
            },
        });

        let outcome = run_tracked(&tracker, &id, op, Arc::new(NullProgress), &token)
            .await
            .unwrap();

        assert!(outcome.is_success());
        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.result.as_ref().unwrap()["pages"], json!(12));
    }

    #[tokio::test]
    async fn failure_records_the_error() {
        let (tracker, id, token) = fixture();
        let op = Arc::new(ScriptedOp {
            outcome: |_| Err(OperationError::failed("connection reset")),
        });

        let outcome = run_tracked(&tracker, &id, op, Arc::new(NullProgress), &token)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Failed(_)));
        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.result.as_ref().unwrap()["error"],
            json!("connection reset")
        );
    }

    #[tokio::test]
    async fn tripped_token_cancels_the_record() {
        let (tracker, id, token) = fixture();
        token.cancel();
        let op = Arc::new(ScriptedOp {
            outcome: |_| Ok(Map::new()),
        });

        let outcome = run_tracked(&tracker, &id, op, Arc::new(NullProgress), &token)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(
            tracker.get_task(&id).unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn panic_is_contained_as_failure() {
        let (tracker, id, token) = fixture();
        let op = Arc::new(ScriptedOp {
            outcome: |_| panic!("operation bug"),
        });

        let outcome = run_tracked(&tracker, &id, op, Arc::new(NullProgress), &token)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Failed(_)));
        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.result.as_ref().unwrap()["error"],
            json!("operation panicked")
        );
    }

    #[tokio::test]
    async fn terminal_tasks_cannot_be_rerun() {
        let (tracker, id, token) = fixture();
        tracker.complete_task(&id, true, None);
        let op = Arc::new(ScriptedOp {
            outcome: |_| Ok(Map::new()),
        });

        let err = run_tracked(&tracker, &id, op, Arc::new(NullProgress), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn unknown_tasks_are_rejected() {
        let tracker = TaskTracker::new(InMemoryTaskStore::new());
        let op = Arc::new(ScriptedOp {
            outcome: |_| Ok(Map::new()),
        });

        let err = run_tracked(
            &tracker,
            &TaskId::generate(),
            op,
            Arc::new(NullProgress),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownTask(_)));
    }
}

//! The task lifecycle state machine and query surface.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

use quarry_core::{
    StoreResult, Task, TaskId, TaskStatus, TaskStore, TaskUpdate,
};

use crate::file_store::JsonTaskStore;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Filter for [`TaskTracker::list_tasks`].
///
/// ```rust
/// use quarry_core::TaskStatus;
/// use quarry_store::TaskFilter;
///
/// let filter = TaskFilter::new()
///     .with_status(TaskStatus::Running)
///     .with_kind("url_update")
///     .with_limit(25);
/// ```
#[derive(Debug, Clone)]
pub struct TaskFilter {
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Only tasks of this kind.
    pub kind: Option<String>,
    /// Maximum number of tasks returned.
    pub limit: usize,
}

impl TaskFilter {
    /// Default number of tasks a listing returns.
    pub const DEFAULT_LIMIT: usize = 10;

    /// Unfiltered listing bounded by [`Self::DEFAULT_LIMIT`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to one task kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Change the result bound.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(kind) = &self.kind
            && task.kind != *kind
        {
            return false;
        }
        true
    }
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            kind: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// The lifecycle API over a [`TaskStore`].
///
/// Every mutation is one serialized load-mutate-save cycle under a single
/// mutex, so concurrent logical callers inside one process (an API handler
/// and the scheduler, say) cannot interleave partial table writes. Across
/// *separate* tracker instances on the same backing file the whole-table
/// rewrite means last writer wins; that race is benign at this scale and a
/// documented limitation, not a linearizability guarantee.
///
/// Unknown ids and invalid transitions are reported as `false` results and
/// log lines, never as errors or panics: background operations must not
/// crash their host merely because tracking failed. The one exception is
/// [`TaskTracker::create_task`], which surfaces persistence failure, since
/// a caller initiating work needs to know tracking is down.
pub struct TaskTracker<S: TaskStore = JsonTaskStore> {
    store: Arc<Mutex<S>>,
}

impl<S: TaskStore> Clone for TaskTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl TaskTracker<JsonTaskStore> {
    /// Tracker over a JSON file at the given path.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(JsonTaskStore::new(path))
    }

    /// Tracker over the default store location.
    pub fn open_default() -> Self {
        Self::new(JsonTaskStore::default())
    }
}

impl<S: TaskStore> TaskTracker<S> {
    /// Wrap a store in a tracker.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a new queued task and persist it.
    ///
    /// Returns the fresh id on success. Persistence failure is surfaced
    /// here, unlike the update paths.
    pub fn create_task(
        &self,
        kind: impl Into<String>,
        params: Map<String, Value>,
        description: impl Into<String>,
    ) -> StoreResult<TaskId> {
        let task = Task::new(kind, params, description);
        let id = task.id.clone();

        let mut store = self.lock();
        let mut table = store.load();
        table.insert(task);
        store.save(&table)?;

        tracing::info!(task_id = %id, "Created task");
        Ok(id)
    }

    /// Apply a partial update, bumping `updated_at`.
    ///
    /// Returns `false` without applying anything when the id is unknown,
    /// when the update would move a terminal task back into `queued` or
    /// `running` (status never regresses out of a terminal state), or when
    /// persistence fails. Message, result and checkpoint edits on terminal
    /// tasks remain allowed for audit purposes.
    pub fn update_task(&self, id: &TaskId, update: TaskUpdate) -> bool {
        let mut store = self.lock();
        let mut table = store.load();
        let Some(task) = table.get_mut(id) else {
            tracing::warn!(task_id = %id, "Update for unknown task");
            return false;
        };

        if let Some(status) = update.status
            && task.status.is_terminal()
            && status != task.status
        {
            tracing::warn!(
                task_id = %id,
                from = %task.status,
                to = %status,
                "Rejected status change out of a terminal state"
            );
            return false;
        }

        update.apply(task);

        match store.save(&table) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Failed to persist task update");
                false
            }
        }
    }

    /// Record a progress report without touching the status.
    ///
    /// The direct target of a progress callback. Reports against terminal
    /// tasks are dropped (`false`): their progress is frozen at the value
    /// last reported while they were live. Out-of-order percents are stored
    /// as given; monotonicity is the operation's responsibility, and
    /// robustness here beats strictness.
    pub fn update_task_progress(
        &self,
        id: &TaskId,
        percent: f64,
        message: Option<&str>,
    ) -> bool {
        let mut store = self.lock();
        let mut table = store.load();
        let Some(task) = table.get_mut(id) else {
            tracing::warn!(task_id = %id, "Progress report for unknown task");
            return false;
        };
        if task.is_terminal() {
            tracing::debug!(task_id = %id, status = %task.status, "Dropped progress report for terminal task");
            return false;
        }

        let mut update = TaskUpdate::new().with_progress(percent);
        if let Some(message) = message {
            update = update.with_message(message);
        }
        update.apply(task);

        match store.save(&table) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Failed to persist progress report");
                false
            }
        }
    }

    /// Terminal transition to `completed` (success) or `failed`.
    ///
    /// Sets `progress = 100` on success and stores the result payload.
    /// Returns `false` for unknown ids, for tasks that already reached a
    /// terminal state, or on persistence failure.
    pub fn complete_task(
        &self,
        id: &TaskId,
        success: bool,
        result: Option<Map<String, Value>>,
    ) -> bool {
        let mut store = self.lock();
        let mut table = store.load();
        let Some(task) = table.get_mut(id) else {
            tracing::warn!(task_id = %id, "Completion for unknown task");
            return false;
        };
        if task.is_terminal() {
            tracing::warn!(task_id = %id, status = %task.status, "Completion for terminal task");
            return false;
        }

        task.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if success {
            task.progress = 100.0;
        }
        if let Some(result) = result {
            task.result = Some(result);
        }
        task.touch();
        let status = task.status;

        match store.save(&table) {
            Ok(()) => {
                tracing::info!(task_id = %id, status = %status, "Task reached terminal state");
                true
            }
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Failed to persist task completion");
                false
            }
        }
    }

    /// Terminal transition to `cancelled`.
    ///
    /// Valid only while the task is `queued` or `running`; returns `false`
    /// for unknown ids and already-terminal tasks. This marks intent only:
    /// the running operation must observe its cancellation token to actually
    /// halt.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let mut store = self.lock();
        let mut table = store.load();
        let Some(task) = table.get_mut(id) else {
            tracing::warn!(task_id = %id, "Cancellation for unknown task");
            return false;
        };
        if !task.status.is_resumable() {
            tracing::debug!(task_id = %id, status = %task.status, "Cancellation for terminal task");
            return false;
        }

        task.status = TaskStatus::Cancelled;
        task.touch();

        match store.save(&table) {
            Ok(()) => {
                tracing::info!(task_id = %id, "Task cancelled");
                true
            }
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Failed to persist task cancellation");
                false
            }
        }
    }

    /// Look up a task by id.
    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.lock().load().get(id).cloned()
    }

    /// List tasks matching the filter, newest first by `updated_at`.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let table = self.lock().load();
        let mut tasks: Vec<Task> = table
            .tasks
            .into_values()
            .filter(|task| filter.matches(task))
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        tasks.truncate(filter.limit);
        tasks
    }

    /// Tasks that were in flight (`queued` or `running`) when the process
    /// last stopped. Candidates for resumption, newest first.
    pub fn list_resumable_tasks(&self) -> Vec<Task> {
        let table = self.lock().load();
        let mut tasks: Vec<Task> = table
            .tasks
            .into_values()
            .filter(Task::is_resumable)
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        tasks
    }

    /// On-disk footprint of the backing store in megabytes.
    pub fn get_cache_size(&self) -> f64 {
        self.lock().size_bytes() as f64 / BYTES_PER_MB
    }

    /// Delete every record and associated temp artifact.
    pub fn clear_cache(&self) -> bool {
        match self.lock().clear() {
            Ok(()) => {
                tracing::info!("Cleared task cache");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear task cache");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryTaskStore;
    use quarry_core::TaskUpdate;
    use rstest::rstest;
    use serde_json::json;

    fn tracker() -> TaskTracker<InMemoryTaskStore> {
        TaskTracker::new(InMemoryTaskStore::new())
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Drive a fresh task into the given status.
    fn task_in_status(tracker: &TaskTracker<InMemoryTaskStore>, status: TaskStatus) -> TaskId {
        let id = tracker.create_task("custom", Map::new(), "fixture").unwrap();
        match status {
            TaskStatus::Queued => {}
            TaskStatus::Running => {
                assert!(tracker.update_task(
                    &id,
                    TaskUpdate::new().with_status(TaskStatus::Running)
                ));
            }
            TaskStatus::Completed => {
                assert!(tracker.complete_task(&id, true, None));
            }
            TaskStatus::Failed => {
                assert!(tracker.complete_task(&id, false, None));
            }
            TaskStatus::Cancelled => {
                assert!(tracker.cancel_task(&id));
            }
        }
        id
    }

    #[test]
    fn created_ids_are_distinct() {
        let tracker = tracker();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..32 {
            ids.insert(tracker.create_task("custom", Map::new(), "unique").unwrap());
        }
        assert_eq!(ids.len(), 32);
    }

    #[test]
    fn new_task_starts_queued_at_zero() {
        let tracker = tracker();
        let id = tracker
            .create_task(
                "url_update",
                params(&[("url", json!("https://example.com"))]),
                "Updating dataset",
            )
            .unwrap();

        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, 0.0);
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(task.params["url"], json!("https://example.com"));
    }

    #[test]
    fn updates_against_unknown_ids_fail_quietly() {
        let tracker = tracker();
        let ghost = TaskId::generate();
        assert!(!tracker.update_task(&ghost, TaskUpdate::new().with_progress(10.0)));
        assert!(!tracker.update_task_progress(&ghost, 10.0, None));
        assert!(!tracker.complete_task(&ghost, true, None));
        assert!(!tracker.cancel_task(&ghost));
        assert!(tracker.get_task(&ghost).is_none());
    }

    #[test]
    fn progress_updates_leave_status_alone() {
        let tracker = tracker();
        let id = task_in_status(&tracker, TaskStatus::Running);

        assert!(tracker.update_task_progress(&id, 40.0, Some("fetching")));

        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress, 40.0);
        assert_eq!(task.message.as_deref(), Some("fetching"));
    }

    #[test]
    fn latest_progress_wins() {
        let tracker = tracker();
        let id = task_in_status(&tracker, TaskStatus::Running);

        for percent in [10.0, 25.0, 60.0, 95.0] {
            assert!(tracker.update_task_progress(&id, percent, None));
        }
        assert_eq!(tracker.get_task(&id).unwrap().progress, 95.0);

        // Out-of-order reports are stored as given, not rejected or clamped.
        assert!(tracker.update_task_progress(&id, 50.0, None));
        assert_eq!(tracker.get_task(&id).unwrap().progress, 50.0);
    }

    #[test]
    fn successful_completion_pins_progress_and_result() {
        let tracker = tracker();
        let id = task_in_status(&tracker, TaskStatus::Running);

        assert!(tracker.complete_task(&id, true, Some(params(&[("pages", json!(12))]))));

        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.result.as_ref().unwrap()["pages"], json!(12));
    }

    #[test]
    fn failed_completion_keeps_last_progress() {
        let tracker = tracker();
        let id = task_in_status(&tracker, TaskStatus::Running);
        tracker.update_task_progress(&id, 37.0, None);

        assert!(tracker.complete_task(
            &id,
            false,
            Some(params(&[("error", json!("connection reset"))]))
        ));

        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 37.0);
        assert_eq!(task.result.as_ref().unwrap()["error"], json!("connection reset"));
    }

    #[rstest]
    #[case(TaskStatus::Queued, true)]
    #[case(TaskStatus::Running, true)]
    #[case(TaskStatus::Completed, false)]
    #[case(TaskStatus::Failed, false)]
    #[case(TaskStatus::Cancelled, false)]
    fn cancel_succeeds_only_in_flight(#[case] status: TaskStatus, #[case] expect: bool) {
        let tracker = tracker();
        let id = task_in_status(&tracker, status);
        assert_eq!(tracker.cancel_task(&id), expect);
    }

    #[rstest]
    #[case(TaskStatus::Completed)]
    #[case(TaskStatus::Failed)]
    #[case(TaskStatus::Cancelled)]
    fn status_never_leaves_terminal_states(#[case] status: TaskStatus) {
        let tracker = tracker();
        let id = task_in_status(&tracker, status);

        for regress in [TaskStatus::Queued, TaskStatus::Running] {
            assert!(!tracker.update_task(&id, TaskUpdate::new().with_status(regress)));
        }
        assert!(!tracker.complete_task(&id, true, None));
        assert_eq!(tracker.get_task(&id).unwrap().status, status);
    }

    #[test]
    fn terminal_tasks_accept_audit_edits_but_freeze_progress() {
        let tracker = tracker();
        let id = task_in_status(&tracker, TaskStatus::Cancelled);

        assert!(tracker.update_task(
            &id,
            TaskUpdate::new().with_message("cancelled by operator")
        ));
        assert!(!tracker.update_task_progress(&id, 80.0, None));

        let task = tracker.get_task(&id).unwrap();
        assert_eq!(task.message.as_deref(), Some("cancelled by operator"));
        assert_eq!(task.progress, 0.0);
    }

    #[test]
    fn listing_filters_sorts_and_bounds() {
        let tracker = tracker();
        for i in 0..4 {
            let id = tracker
                .create_task("scrape", Map::new(), format!("scrape {i}"))
                .unwrap();
            if i % 2 == 0 {
                tracker.complete_task(&id, true, None);
            }
        }
        tracker.create_task("github", Map::new(), "github sync").unwrap();

        let all = tracker.list_tasks(&TaskFilter::new());
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));

        let scrapes = tracker.list_tasks(&TaskFilter::new().with_kind("scrape"));
        assert_eq!(scrapes.len(), 4);

        let done = tracker.list_tasks(&TaskFilter::new().with_status(TaskStatus::Completed));
        assert_eq!(done.len(), 2);

        let bounded = tracker.list_tasks(&TaskFilter::new().with_limit(3));
        assert_eq!(bounded.len(), 3);
    }

    #[test]
    fn resumable_set_tracks_terminal_transitions() {
        let tracker = tracker();
        let queued = task_in_status(&tracker, TaskStatus::Queued);
        let running = task_in_status(&tracker, TaskStatus::Running);
        task_in_status(&tracker, TaskStatus::Completed);
        task_in_status(&tracker, TaskStatus::Failed);
        task_in_status(&tracker, TaskStatus::Cancelled);

        let resumable: Vec<TaskId> = tracker
            .list_resumable_tasks()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(resumable.len(), 2);
        assert!(resumable.contains(&queued));
        assert!(resumable.contains(&running));

        tracker.complete_task(&running, true, None);
        let resumable = tracker.list_resumable_tasks();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].id, queued);
    }

    #[test]
    fn clear_cache_empties_everything() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.create_task("custom", Map::new(), "doomed").unwrap();
        }
        assert!(tracker.get_cache_size() > 0.0);

        assert!(tracker.clear_cache());
        assert!(tracker.list_tasks(&TaskFilter::new()).is_empty());
        assert_eq!(tracker.get_cache_size(), 0.0);
    }
}

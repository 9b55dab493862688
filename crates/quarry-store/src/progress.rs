//! Tracker-backed progress sink.

use quarry_core::{ProgressReporter, TaskId, TaskStore};

use crate::tracker::TaskTracker;

/// A [`ProgressReporter`] that records reports on a task via
/// [`TaskTracker::update_task_progress`].
///
/// Delivery failure (unknown id, terminal task, persistence trouble)
/// degrades to a log line inside the tracker and never reaches the host
/// operation, per the progress contract.
pub struct TrackerProgress<S: TaskStore> {
    tracker: TaskTracker<S>,
    task_id: TaskId,
}

impl<S: TaskStore> TrackerProgress<S> {
    /// Sink reports into the given task.
    pub fn new(tracker: TaskTracker<S>, task_id: TaskId) -> Self {
        Self { tracker, task_id }
    }
}

impl<S: TaskStore> ProgressReporter for TrackerProgress<S> {
    fn report(&self, percent: f64, message: Option<&str>) {
        self.tracker
            .update_task_progress(&self.task_id, percent, message);
    }
}

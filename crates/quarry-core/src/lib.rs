//! # Quarry Core
//!
//! Core task model and lifecycle contracts for the quarry pipeline tracker.
//! This crate defines the persisted [`Task`] record, the [`TaskStore`]
//! persistence seam, and the two contracts long-running operations are built
//! against: [`ProgressReporter`] and [`CancellationToken`].

pub mod cancellation;
pub mod error;
pub mod operation;
pub mod progress;
pub mod store;
pub mod task;

pub use cancellation::CancellationToken;
pub use error::{OperationError, StoreError, StoreResult};
pub use operation::{Operation, OperationContext};
pub use progress::{FanoutProgress, LogProgress, NullProgress, ProgressReporter, StageProgress};
pub use store::{SCHEMA_VERSION, TaskStore, TaskTable};
pub use task::{InvalidTaskId, Task, TaskId, TaskStatus, TaskUpdate};

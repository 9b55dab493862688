//! The collaborator seam for long-running work.
//!
//! Crawls, uploads and exports live outside this crate; they plug in by
//! implementing [`Operation`]. The contract mirrors what the tracker needs
//! and nothing more: opaque parameters in, opaque result map out, progress
//! reported through the injected reporter, cancellation polled through the
//! injected token.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::error::OperationError;
use crate::progress::ProgressReporter;

/// Everything an operation receives from its host.
pub struct OperationContext {
    /// The task's parameter payload, as stored at creation.
    pub params: Map<String, Value>,

    /// The stored resume checkpoint, when continuing an interrupted task.
    pub checkpoint: Option<Value>,

    /// Where to deliver progress reports.
    pub progress: Arc<dyn ProgressReporter>,

    /// Cooperative stop signal; poll at loop boundaries.
    pub cancellation: CancellationToken,
}

impl OperationContext {
    /// String parameter by key.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Boolean parameter by key, with a default for absent keys.
    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

/// A long-running, trackable unit of work.
///
/// Implementations poll `ctx.cancellation` at bounded intervals and return
/// [`OperationError::Cancelled`] when it trips, so the runner can drive the
/// task record to `cancelled` rather than leaving it `running` forever.
#[async_trait]
pub trait Operation: Send + Sync {
    /// The task kind this operation serves (`"url_update"`, `"scrape"`, ...).
    fn kind(&self) -> &str;

    /// Execute the work to completion, early cancellation, or failure.
    async fn run(&self, ctx: OperationContext) -> Result<Map<String, Value>, OperationError>;
}

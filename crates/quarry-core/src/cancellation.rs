//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a shared flag polled by long-running loops at
//! natural boundaries (per page fetched, per file processed). Cancellation
//! is cooperative only: an operation that never polls can run indefinitely.
//!
//! Tokens form a tree. A child created with [`CancellationToken::child`]
//! observes its own flag *or* any ancestor's, so a process-wide interrupt
//! token cancels every in-flight operation while cancelling a single
//! operation leaves its siblings running. Tokens are constructed by the
//! embedding application and injected; there is no process-global state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

/// A shared, settable, polled cancellation signal.
///
/// Cloning is cheap and every clone observes the same flag.
///
/// # Examples
///
/// ```rust
/// use quarry_core::CancellationToken;
///
/// let root = CancellationToken::new();
/// let op = root.child();
///
/// assert!(!op.is_cancelled());
/// root.cancel();
/// assert!(op.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a child token.
    ///
    /// The child trips when either it or any ancestor is cancelled;
    /// cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Set the flag. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }
}

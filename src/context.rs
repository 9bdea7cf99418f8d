//! Per-operation cancellation and deadline context.
//!
//! Every public operation takes a [`Context`] as its first argument. The
//! engine checks it at defined interruption points: before each batch in
//! batched ingestion, before each HTTP round trip in embedding adapters,
//! and before a scoring pass begins. Mutations already committed are never
//! rolled back on cancellation.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadline for one logical operation.
///
/// Cloning is cheap and clones share the same cancellation state, so a
/// caller can hold one clone to cancel an operation running elsewhere.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A cancellable context with a deadline `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A cancellable context with an absolute deadline.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A child context sharing this context's cancellation but with its own
    /// (tighter) deadline.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let child_deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(child_deadline)),
            None => Some(child_deadline),
        };
        Self {
            token: self.token.clone(),
            deadline,
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once [`Context::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the context is cancelled. Never completes for a
    /// background context.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Time until the deadline, if one is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast at an interruption point.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when cancellation was requested,
    /// [`Error::DeadlineExceeded`] when the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

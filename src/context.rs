//! Request Context
//!
//! Carries cancellation and an optional deadline through every store round
//! trip. Cloning shares the same cancellation state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{MetaError, Result};

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Cancellation-aware context for one logical request
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A context that is never cancelled on its own
    pub fn background() -> Self {
        Self::new(None)
    }

    /// A context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Some(Instant::now() + timeout))
    }

    /// `with_timeout` when a timeout is configured, `background` otherwise
    pub fn with_optional_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => Self::with_timeout(t),
            None => Self::background(),
        }
    }

    fn new(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Fail with `Cancelled` once the context was cancelled or its deadline passed
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(MetaError::Cancelled("request cancelled".to_string()));
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(MetaError::Cancelled("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }

    /// Guard that cancels this context when dropped, unless disarmed
    pub fn cancel_on_drop(&self) -> CancelGuard {
        CancelGuard {
            ctx: Some(self.clone()),
        }
    }
}

/// Cancels its context on drop
#[derive(Debug)]
pub struct CancelGuard {
    ctx: Option<Context>,
}

impl CancelGuard {
    /// The request completed; dropping the guard no longer cancels
    pub fn disarm(mut self) {
        self.ctx = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.cancel();
        }
    }
}

//! Process lifecycle flag
//!
//! Tracks whether the service still accepts requests. The lock is held only
//! around the flag itself.

use parking_lot::Mutex;

use crate::error::{MetaError, Result};

#[derive(Debug, Default)]
pub struct Lifecycle {
    closed: Mutex<bool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        !*self.closed.lock()
    }

    /// `Unavailable` once the service has been closed
    pub fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(MetaError::Unavailable)
        }
    }

    /// Stop accepting requests. Returns false if already closed.
    pub fn close(&self) -> bool {
        let mut closed = self.closed.lock();
        if *closed {
            return false;
        }
        *closed = true;
        true
    }
}

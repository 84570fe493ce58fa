//! Cooperative cancellation shared between the host and running parts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::WorkflowError;

/// A cloneable flag checked between parts and between phases of a part.
///
/// Cancellation is never observed in the middle of a geometry loop, so a
/// part that is already scoring a layer finishes that layer first.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::warn!("Cancellation requested");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`WorkflowError::Cancelled`] once [`cancel`](Self::cancel)
    /// has been called.
    pub fn check(&self) -> Result<(), WorkflowError> {
        if self.is_cancelled() {
            Err(WorkflowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());

        token.cancel();
        assert!(worker.is_cancelled());
        assert!(matches!(worker.check(), Err(WorkflowError::Cancelled)));
    }
}

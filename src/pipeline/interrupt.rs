use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::executor::ExecutorError;

/// Operator interruption flag shared between the signal listener and a run.
///
/// Setting the flag never cancels work in flight: executors poll it between
/// batches and the controller polls it between steps.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Interrupted)` once the flag is set.
    pub fn check(&self) -> Result<(), ExecutorError> {
        if self.is_set() {
            Err(ExecutorError::Interrupted)
        } else {
            Ok(())
        }
    }
}

//! At-most-one reselection guard

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Running flag shared between the dispatcher and the reselection task
#[derive(Debug, Clone, Default)]
pub struct ReselectGuard {
    running: Arc<AtomicBool>,
}

impl ReselectGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot; `None` when a reselection is already running
    pub fn try_acquire(&self) -> Option<ReselectPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReselectPermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held by the running task; releases the slot when dropped
#[derive(Debug)]
pub struct ReselectPermit {
    running: Arc<AtomicBool>,
}

impl Drop for ReselectPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide admission flag: at most one batch run at a time, regardless
/// of whether the scheduler or the manual trigger path started it.
#[derive(Debug, Default)]
pub struct RunGuard {
    in_flight: AtomicBool,
}

impl RunGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to claim the single run slot.
    ///
    /// The returned permit releases the slot on drop, which covers success,
    /// error, and drop-by-cancellation alike; a crashed run can never leave
    /// the flag permanently set.
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { guard: Arc::clone(self) })
    }

    pub fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// RAII token for the run slot.
#[derive(Debug)]
pub struct RunPermit {
    guard: Arc<RunGuard>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::Release);
    }
}

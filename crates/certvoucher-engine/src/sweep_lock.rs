//! Non-overlap guard for periodic sweeps.
//!
//! A sweep holds its [`SweepLock`] for its whole run. A second sweep of the
//! same kind started meanwhile is refused instead of interleaving with the
//! first. The lock is released when the returned guard is dropped, including
//! on early return and on panic.

use std::sync::atomic::{AtomicBool, Ordering};

use certvoucher_types::{Result, VoucherError};

/// In-process lock that admits one sweep at a time.
#[derive(Debug)]
pub struct SweepLock {
    name: &'static str,
    running: AtomicBool,
}

impl SweepLock {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
        }
    }

    /// Take the lock for the duration of one sweep.
    ///
    /// # Errors
    /// Returns [`VoucherError::SweepInProgress`] if another sweep holds it.
    pub fn try_acquire(&self) -> Result<SweepGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SweepGuard { lock: self })
            .map_err(|_| VoucherError::SweepInProgress(self.name))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Releases its [`SweepLock`] on drop.
#[derive(Debug)]
pub struct SweepGuard<'a> {
    lock: &'a SweepLock,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.lock.running.store(false, Ordering::Release);
    }
}

//! # certvoucher-store
//!
//! Persistent repository of voucher records and their append-only log.
//!
//! ## Contract
//!
//! The engine never does read-then-write. Every status change goes through
//! [`VoucherStore::conditional_transition`], which commits only if the voucher
//! is still in the [`Expectation`]ed state and writes the transition's log
//! entry in the same transaction:
//!
//! ```text
//! UPDATE vouchers SET ... WHERE id = ? AND status = ? [AND revision = ?]
//!   └─ 1 row  → INSERT voucher_logs, COMMIT, Ok(true)
//!   └─ 0 rows → ROLLBACK, Ok(false)   (someone else got there first)
//! ```
//!
//! No voucher state is cached between calls: every method reads the
//! current database state.

pub mod sqlite;

use std::collections::BTreeMap;

use certvoucher_types::{
    ActorId, Expectation, ImportRecord, NewLogEntry, Page, PageRequest, RequestId, Result,
    Voucher, VoucherChange, VoucherFilter, VoucherId, VoucherLogEntry, VoucherStatus,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteVoucherStore;

/// Repository operations required by the engine.
///
/// Implementations must make [`conditional_transition`](Self::conditional_transition)
/// a single atomic compare-and-set; everything else in the engine relies on it.
pub trait VoucherStore: Send + Sync {
    /// One voucher that may be allocated: RECYCLABLE first, then AVAILABLE.
    fn find_allocatable(&self) -> Result<Option<Voucher>>;

    /// Atomically apply `change` if the voucher still matches `expected`,
    /// appending `log` in the same transaction.
    ///
    /// Returns `Ok(false)` when the voucher no longer matches.
    ///
    /// # Errors
    /// - `InvalidTransition` if the state machine forbids `expected.status → change.to`
    /// - `RequestAlreadyLinked` if the change would link a request that is
    ///   already linked to another voucher
    /// - `Persistence` on storage failure
    fn conditional_transition(
        &self,
        id: VoucherId,
        expected: Expectation,
        change: &VoucherChange,
        log: &NewLogEntry,
    ) -> Result<bool>;

    /// Append a log entry that accompanies no status change.
    fn append_log(&self, entry: &NewLogEntry) -> Result<VoucherLogEntry>;

    /// Insert new AVAILABLE vouchers, skipping codes that already exist.
    /// Each inserted voucher gets one IMPORT log entry.
    ///
    /// Returns the number of vouchers actually inserted.
    fn bulk_insert_ignoring_duplicates(
        &self,
        records: &[ImportRecord],
        actor: Option<ActorId>,
        at: DateTime<Utc>,
    ) -> Result<usize>;

    /// ALLOCATED vouchers whose `allocated_at` is more than `age` before `now`.
    fn list_allocated_older_than(&self, age: Duration, now: DateTime<Utc>) -> Result<Vec<Voucher>>;

    /// Every voucher in `status`, oldest first.
    fn list_by_status(&self, status: VoucherStatus) -> Result<Vec<Voucher>>;

    fn get(&self, id: VoucherId) -> Result<Option<Voucher>>;

    fn find_by_code(&self, code: &str) -> Result<Option<Voucher>>;

    /// The voucher currently linked to `request_id`, if any.
    fn find_by_request(&self, request_id: RequestId) -> Result<Option<Voucher>>;

    /// Filtered, paginated operator listing.
    fn list(&self, filter: &VoucherFilter, page: PageRequest) -> Result<Page<Voucher>>;

    /// Log entries of one voucher, in commit order.
    fn logs_for(&self, id: VoucherId) -> Result<Vec<VoucherLogEntry>>;

    /// The whole audit trail, in commit order.
    fn log_trail(&self) -> Result<Vec<VoucherLogEntry>>;

    fn count_by_status(&self) -> Result<StatusCounts>;
}

/// Number of vouchers per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    counts: BTreeMap<String, u64>,
}

impl StatusCounts {
    pub fn set(&mut self, status: VoucherStatus, count: u64) {
        self.counts.insert(status.as_str().to_string(), count);
    }

    #[must_use]
    pub fn get(&self, status: VoucherStatus) -> u64 {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Vouchers that allocation can still hand out.
    #[must_use]
    pub fn allocatable(&self) -> u64 {
        self.get(VoucherStatus::Available) + self.get(VoucherStatus::Recyclable)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_totals() {
        let mut counts = StatusCounts::default();
        counts.set(VoucherStatus::Available, 3);
        counts.set(VoucherStatus::Recyclable, 2);
        counts.set(VoucherStatus::Used, 7);
        assert_eq!(counts.allocatable(), 5);
        assert_eq!(counts.get(VoucherStatus::Allocated), 0);
        assert_eq!(counts.total(), 12);
    }
}

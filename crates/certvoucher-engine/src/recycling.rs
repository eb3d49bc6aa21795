//! Grace-period recycling.
//!
//! ALLOCATED vouchers whose allocation is older than the grace period go back
//! to the pool as RECYCLABLE, losing their client identity and request link.
//! Each transition is conditional on the voucher still being in the exact
//! state the sweep read, so a voucher reconciled to USED (or re-allocated) in
//! the meantime is skipped, not recycled.

use std::sync::Arc;

use certvoucher_store::VoucherStore;
use certvoucher_types::{
    Expectation, LogAction, NewLogEntry, RecyclingConfig, Result, Voucher, VoucherChange,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sweep_lock::SweepLock;

/// Counters of one recycling sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleReport {
    /// Stale allocations found at sweep start.
    pub candidates: usize,
    pub recycled: usize,
    /// Lost the conditional transition (consumed or changed concurrently).
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct RecyclingScheduler {
    store: Arc<dyn VoucherStore>,
    config: RecyclingConfig,
    lock: SweepLock,
}

impl RecyclingScheduler {
    pub fn new(store: Arc<dyn VoucherStore>, config: RecyclingConfig) -> Self {
        Self {
            store,
            config,
            lock: SweepLock::new("recycling"),
        }
    }

    /// Configured grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.config.grace_period()
    }

    /// Recycle every allocation older than `grace_period`, as of now.
    pub fn sweep(&self, grace_period: Duration) -> Result<RecycleReport> {
        self.sweep_at(grace_period, Utc::now(), &CancellationToken::new())
    }

    /// Recycle every allocation older than `grace_period` as of `now`,
    /// stopping early once `cancel` fires.
    ///
    /// # Errors
    /// - `SweepInProgress` if another recycling sweep is running
    /// - `Persistence` if the candidate list cannot be read
    pub fn sweep_at(
        &self,
        grace_period: Duration,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RecycleReport> {
        let _guard = self.lock.try_acquire()?;
        let candidates = self.store.list_allocated_older_than(grace_period, now)?;
        let mut report = RecycleReport {
            candidates: candidates.len(),
            ..RecycleReport::default()
        };

        for voucher in &candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.recycle_one(voucher, now) {
                Ok(true) => report.recycled += 1,
                Ok(false) => {
                    debug!(voucher = %voucher.code, "Recycle skipped, voucher changed concurrently");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(voucher = %voucher.code, error = %e, "Recycle failed for voucher");
                    report.failed += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            recycled = report.recycled,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            grace_days = grace_period.num_days(),
            "Recycling sweep finished"
        );
        Ok(report)
    }

    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.lock.is_running()
    }

    fn recycle_one(&self, voucher: &Voucher, now: DateTime<Utc>) -> Result<bool> {
        let elapsed_days = voucher
            .allocated_at
            .map_or(0, |at| (now - at).num_days());
        let log = NewLogEntry::new(
            voucher.id,
            LogAction::Recycle,
            format!(
                "recycled after {elapsed_days} days unused; discarded client {} ({}), request {}",
                voucher.client_name.as_deref().unwrap_or("-"),
                voucher.client_document.as_deref().unwrap_or("-"),
                voucher
                    .linked_request_id
                    .map_or_else(|| "-".to_string(), |r| r.to_string()),
            ),
            None,
            now,
        );
        let committed = self.store.conditional_transition(
            voucher.id,
            Expectation::observed(voucher),
            &VoucherChange::recycle(),
            &log,
        )?;
        if committed {
            info!(voucher = %voucher.code, elapsed_days, "Voucher recycled");
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use certvoucher_store::SqliteVoucherStore;
    use certvoucher_types::{ImportRecord, RequestId, VoucherStatus};

    use super::*;

    fn allocate_at(store: &SqliteVoucherStore, code: &str, at: DateTime<Utc>) -> Voucher {
        store
            .bulk_insert_ignoring_duplicates(&[ImportRecord::new(code, "P")], None, at)
            .unwrap();
        let v = store.find_by_code(code).unwrap().unwrap();
        let change = VoucherChange::allocate(RequestId::new(), "Fulano", "123", None, at);
        let log = NewLogEntry::new(v.id, LogAction::Allocate, "allocated", None, at);
        store
            .conditional_transition(v.id, Expectation::observed(&v), &change, &log)
            .unwrap();
        store.get(v.id).unwrap().unwrap()
    }

    #[test]
    fn recycles_only_past_grace() {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let scheduler = RecyclingScheduler::new(store.clone(), RecyclingConfig::default());
        let now = Utc::now();
        let old = allocate_at(&store, "OLD", now - Duration::days(3) - Duration::minutes(1));
        let fresh = allocate_at(&store, "NEW", now - Duration::days(2));

        let report = scheduler
            .sweep_at(scheduler.grace_period(), now, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.recycled, 1);

        let old = store.get(old.id).unwrap().unwrap();
        assert_eq!(old.status, VoucherStatus::Recyclable);
        assert!(old.client_name.is_none());
        assert!(old.client_document.is_none());
        assert!(old.linked_request_id.is_none());
        assert!(old.allocated_at.is_none());
        let last = store.logs_for(old.id).unwrap().pop().unwrap();
        assert_eq!(last.action, LogAction::Recycle);
        assert!(last.description.contains("3 days"));

        assert_eq!(store.get(fresh.id).unwrap().unwrap().status, VoucherStatus::Allocated);
    }

    #[test]
    fn cancelled_sweep_touches_nothing() {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let scheduler = RecyclingScheduler::new(store.clone(), RecyclingConfig::default());
        let now = Utc::now();
        let v = allocate_at(&store, "OLD", now - Duration::days(10));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = scheduler.sweep_at(Duration::days(3), now, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.recycled, 0);
        assert_eq!(store.get(v.id).unwrap().unwrap().status, VoucherStatus::Allocated);
    }
}

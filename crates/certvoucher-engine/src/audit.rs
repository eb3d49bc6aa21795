//! Inventory audit.
//!
//! Read-only checks over the whole store, run on demand by the operator:
//! ```text
//! ∀ voucher: identity fields match status, USED ⇒ used_at
//! ∀ request: linked to at most one voucher
//! ∀ voucher: first log entry is IMPORT
//! log trail: digest[n] == H(digest[n-1] || entry[n])
//! ```
//! The store already enforces most of these at write time. The audit exists to
//! catch anything that reached the database some other way.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use certvoucher_store::{StatusCounts, VoucherStore};
use certvoucher_types::{
    GENESIS_DIGEST, LogAction, RequestId, Result, Voucher, VoucherLogEntry, VoucherStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Per-status voucher counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub counts: StatusCounts,
    pub allocatable: u64,
    pub total: u64,
}

impl From<StatusCounts> for InventorySnapshot {
    fn from(counts: StatusCounts) -> Self {
        Self {
            allocatable: counts.allocatable(),
            total: counts.total(),
            counts,
        }
    }
}

/// Result of recomputing the log digest chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub entries: usize,
    /// Sequence of the first entry whose digest does not follow from its
    /// predecessor.
    pub first_broken: Option<u64>,
    /// Hex digest of the last entry.
    pub head: Option<String>,
}

impl ChainVerification {
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReport {
    pub snapshot: InventorySnapshot,
    /// One line per voucher whose fields contradict its status.
    pub invariant_violations: Vec<String>,
    /// Requests linked to more than one voucher.
    pub duplicate_links: Vec<RequestId>,
    /// Codes of vouchers whose trail does not start with IMPORT.
    pub missing_import: Vec<String>,
    pub chain: ChainVerification,
}

impl InventoryReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.invariant_violations.is_empty()
            && self.duplicate_links.is_empty()
            && self.missing_import.is_empty()
            && self.chain.is_intact()
    }
}

pub struct InventoryAudit {
    store: Arc<dyn VoucherStore>,
}

impl InventoryAudit {
    pub fn new(store: Arc<dyn VoucherStore>) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> Result<InventorySnapshot> {
        Ok(self.store.count_by_status()?.into())
    }

    /// Recompute the digest chain of the full audit trail.
    pub fn verify_log_chain(&self) -> Result<ChainVerification> {
        let trail = self.store.log_trail()?;
        Ok(verify_chain(&trail))
    }

    /// Run every check.
    ///
    /// # Errors
    /// `Persistence` if the store cannot be read. Violations are reported,
    /// not returned as errors.
    pub fn run(&self) -> Result<InventoryReport> {
        let mut vouchers = Vec::new();
        for status in VoucherStatus::ALL {
            vouchers.extend(self.store.list_by_status(status)?);
        }
        let trail = self.store.log_trail()?;
        let report = inspect(self.snapshot()?, &vouchers, &trail);

        if report.is_clean() {
            info!(
                vouchers = vouchers.len(),
                log_entries = report.chain.entries,
                "Inventory audit clean"
            );
        } else {
            warn!(
                violations = report.invariant_violations.len(),
                duplicate_links = report.duplicate_links.len(),
                missing_import = report.missing_import.len(),
                first_broken = ?report.chain.first_broken,
                "Inventory audit found problems"
            );
        }
        Ok(report)
    }
}

fn inspect(
    snapshot: InventorySnapshot,
    vouchers: &[Voucher],
    trail: &[VoucherLogEntry],
) -> InventoryReport {
    let invariant_violations = vouchers
        .iter()
        .filter_map(|v| v.check_invariants().err().map(|e| e.to_string()))
        .collect();

    let mut links: HashMap<RequestId, usize> = HashMap::new();
    for request in vouchers.iter().filter_map(|v| v.linked_request_id) {
        *links.entry(request).or_insert(0) += 1;
    }
    let mut duplicate_links: Vec<RequestId> = links
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(r, _)| r)
        .collect();
    duplicate_links.sort();

    let mut seen = HashSet::new();
    let mut imported = HashSet::new();
    for entry in trail {
        if seen.insert(entry.voucher_id) && entry.action == LogAction::Import {
            imported.insert(entry.voucher_id);
        }
    }
    let missing_import = vouchers
        .iter()
        .filter(|v| !imported.contains(&v.id))
        .map(|v| v.code.clone())
        .collect();

    InventoryReport {
        snapshot,
        invariant_violations,
        duplicate_links,
        missing_import,
        chain: verify_chain(trail),
    }
}

fn verify_chain(trail: &[VoucherLogEntry]) -> ChainVerification {
    let mut previous = GENESIS_DIGEST;
    let mut first_broken = None;
    for entry in trail {
        if first_broken.is_none() && !entry.verify_chain(&previous) {
            first_broken = Some(entry.sequence);
        }
        previous = entry.digest;
    }
    ChainVerification {
        entries: trail.len(),
        first_broken,
        head: trail.last().map(VoucherLogEntry::digest_hex),
    }
}

#[cfg(test)]
mod tests {
    use certvoucher_store::SqliteVoucherStore;
    use certvoucher_types::{Expectation, ImportRecord, NewLogEntry, VoucherChange};
    use chrono::Utc;

    use super::*;

    fn seeded() -> Arc<SqliteVoucherStore> {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let records = [ImportRecord::new("A", "P"), ImportRecord::new("B", "P")];
        store
            .bulk_insert_ignoring_duplicates(&records, None, Utc::now())
            .unwrap();
        let a = store.find_by_code("A").unwrap().unwrap();
        let change = VoucherChange::allocate(RequestId::new(), "Fulano", "1", None, Utc::now());
        let log = NewLogEntry::new(a.id, LogAction::Allocate, "allocated", None, Utc::now());
        store
            .conditional_transition(a.id, Expectation::observed(&a), &change, &log)
            .unwrap();
        store
    }

    #[test]
    fn healthy_store_is_clean() {
        let audit = InventoryAudit::new(seeded());
        let report = audit.run().unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.snapshot.total, 2);
        assert_eq!(report.snapshot.allocatable, 1);
        assert_eq!(report.chain.entries, 3);
        assert!(report.chain.head.is_some());
    }

    #[test]
    fn tampered_entry_breaks_chain() {
        let store = seeded();
        let mut trail = store.log_trail().unwrap();
        assert!(verify_chain(&trail).is_intact());

        trail[1].description.push_str(" (edited)");
        let check = verify_chain(&trail);
        assert_eq!(check.first_broken, Some(trail[1].sequence));
    }

    #[test]
    fn detects_shape_and_link_problems() {
        let store = seeded();
        let mut vouchers = store.list_by_status(VoucherStatus::Allocated).unwrap();
        vouchers.extend(store.list_by_status(VoucherStatus::Available).unwrap());
        let trail = store.log_trail().unwrap();

        // Second voucher claims the first one's request and loses its name.
        let request = vouchers[0].linked_request_id;
        let mut twin = Voucher::dummy_allocated("2", Utc::now());
        twin.linked_request_id = request;
        twin.client_name = None;
        vouchers.push(twin.clone());

        let report = inspect(store.count_by_status().unwrap().into(), &vouchers, &trail);
        assert_eq!(report.invariant_violations.len(), 1);
        assert_eq!(report.duplicate_links, vec![request.unwrap()]);
        assert_eq!(report.missing_import, vec![twin.code]);
        assert!(!report.is_clean());
    }
}

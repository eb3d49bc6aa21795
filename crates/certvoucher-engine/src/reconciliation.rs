//! # Reconciliation against the external authority
//!
//! Local state says who we *think* holds an ALLOCATED voucher; the authority
//! says whether it was used and by whom. Reconciliation is one-way: the
//! authority always wins.
//!
//! ## Classification
//!
//! ```text
//! query failed / timed out / non-2xx       → QueryError     (voucher untouched)
//! no issuance date, no owner               → NotYetUsed     (voucher untouched)
//! owner document == client document        → ConfirmedOwner (ALLOCATED → USED)
//! no owner document, owner name == client  → ConfirmedOwner
//! issued, no owner identity at all         → ConfirmedOwner
//! anything else                            → ConflictingOwner (ConflictResolver)
//! ```
//!
//! Documents are compared digits-only, names uppercased with collapsed
//! whitespace.
//!
//! ## Sweep Properties
//!
//! - **Per-voucher isolation**: a query error or persistence failure on one
//!   voucher is counted and the sweep moves on
//! - **Fresh reads**: each voucher is re-read right before it is queried
//! - **Rate limited**: `call_delay` between two authority calls
//! - **Cancellable** between vouchers; a cancelled sweep is safe to rerun
//! - **Non-overlapping**: a second concurrent sweep gets `SweepInProgress`

use std::sync::Arc;

use certvoucher_gateway::{CompletionNotice, CompletionNotifier, CompletionOutcome, IssuerClient};
use certvoucher_store::VoucherStore;
use certvoucher_types::{
    Expectation, IssuerSituation, LogAction, NewLogEntry, QueryStatus, ReconciliationConfig,
    Result, Voucher, VoucherChange, VoucherError, VoucherStatus, normalize_document,
    normalize_name,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conflict::{ConflictResolver, Resolution};
use crate::sweep_lock::SweepLock;

/// Result of reconciling one voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOutcome {
    NotYetUsed,
    ConfirmedOwner,
    ConflictingOwner,
    /// The authority could not be queried; retried next sweep.
    QueryError(String),
    /// Another actor changed the voucher between read and write.
    Superseded,
}

/// What the authority's answer means for a voucher, before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    QueryError(String),
    NotYetUsed,
    Confirmed,
    Conflict,
}

/// Classify an authority answer against the locally recorded holder.
#[must_use]
pub fn classify(voucher: &Voucher, situation: &IssuerSituation) -> Classification {
    if let QueryStatus::Failure(reason) = &situation.query_status {
        return Classification::QueryError(reason.clone());
    }
    if !situation.shows_usage() {
        return Classification::NotYetUsed;
    }

    let local_document = voucher.client_document.as_deref().map(normalize_document);
    let local_name = voucher.client_name.as_deref().map(normalize_name);

    let matches = match (&situation.owner_document, &situation.owner_name) {
        (Some(observed), _) => local_document.as_ref() == Some(observed),
        (None, Some(observed)) => local_name.as_ref() == Some(observed),
        (None, None) => true,
    };
    if matches {
        Classification::Confirmed
    } else {
        Classification::Conflict
    }
}

/// Counters of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// ALLOCATED vouchers found at sweep start.
    pub candidates: usize,
    pub not_yet_used: usize,
    pub confirmed: usize,
    pub conflicts: usize,
    pub query_errors: usize,
    /// Changed by another actor before or during processing.
    pub superseded: usize,
    /// Persistence failures, caught per voucher.
    pub failed: usize,
    pub cancelled: bool,
}

impl ReconcileReport {
    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::NotYetUsed => self.not_yet_used += 1,
            SyncOutcome::ConfirmedOwner => self.confirmed += 1,
            SyncOutcome::ConflictingOwner => self.conflicts += 1,
            SyncOutcome::QueryError(_) => self.query_errors += 1,
            SyncOutcome::Superseded => self.superseded += 1,
        }
    }

    /// Vouchers actually processed.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.not_yet_used
            + self.confirmed
            + self.conflicts
            + self.query_errors
            + self.superseded
            + self.failed
    }
}

/// Polls the authority for ALLOCATED vouchers and applies the verdicts.
pub struct ReconciliationService {
    store: Arc<dyn VoucherStore>,
    issuer: Arc<dyn IssuerClient>,
    notifier: Arc<dyn CompletionNotifier>,
    resolver: ConflictResolver,
    config: ReconciliationConfig,
    lock: SweepLock,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn VoucherStore>,
        issuer: Arc<dyn IssuerClient>,
        notifier: Arc<dyn CompletionNotifier>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            resolver: ConflictResolver::new(Arc::clone(&store), Arc::clone(&notifier)),
            store,
            issuer,
            notifier,
            config,
            lock: SweepLock::new("reconciliation"),
        }
    }

    /// Reconcile one ALLOCATED voucher.
    ///
    /// Query failures are an outcome, not an error.
    ///
    /// # Errors
    /// - `NotReconcilable` if `voucher` is not ALLOCATED
    /// - `Persistence` on storage failure
    pub async fn sync(&self, voucher: &Voucher) -> Result<SyncOutcome> {
        if voucher.status != VoucherStatus::Allocated {
            return Err(VoucherError::NotReconcilable {
                id: voucher.id,
                status: voucher.status,
            });
        }

        let situation = match self.query(&voucher.code).await {
            Ok(situation) => situation,
            Err(reason) => {
                warn!(voucher = %voucher.code, reason = %reason, "Issuer query failed");
                return Ok(SyncOutcome::QueryError(reason));
            }
        };

        let outcome = match classify(voucher, &situation) {
            Classification::QueryError(reason) => {
                warn!(voucher = %voucher.code, reason = %reason, "Issuer reported query failure");
                SyncOutcome::QueryError(reason)
            }
            Classification::NotYetUsed => SyncOutcome::NotYetUsed,
            Classification::Confirmed => self.confirm(voucher, &situation).await?,
            Classification::Conflict => {
                match self
                    .resolver
                    .resolve(
                        voucher,
                        situation.owner_name.as_deref(),
                        situation.owner_document.as_deref(),
                        situation.issued_at,
                    )
                    .await?
                {
                    Resolution::Reassigned => SyncOutcome::ConflictingOwner,
                    Resolution::AlreadyUsed | Resolution::Superseded => SyncOutcome::Superseded,
                }
            }
        };

        debug!(voucher = %voucher.code, outcome = ?outcome, "Voucher reconciled");
        Ok(outcome)
    }

    /// Reconcile every ALLOCATED voucher once.
    ///
    /// # Errors
    /// - `SweepInProgress` if another reconciliation sweep is running
    /// - `Persistence` if the candidate list cannot be read
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        let _guard = self.lock.try_acquire()?;
        let candidates = self.store.list_by_status(VoucherStatus::Allocated)?;
        let mut report = ReconcileReport {
            candidates: candidates.len(),
            ..ReconcileReport::default()
        };
        info!(candidates = report.candidates, "Reconciliation sweep started");

        let delay = self.config.call_delay();
        let mut queried = false;
        for candidate in &candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let current = match self.store.get(candidate.id) {
                Ok(Some(v)) if v.status == VoucherStatus::Allocated => v,
                Ok(_) => {
                    debug!(voucher = %candidate.code, "No longer ALLOCATED, skipped");
                    report.superseded += 1;
                    continue;
                }
                Err(e) => {
                    warn!(voucher = %candidate.code, error = %e, "Reconciliation read failed");
                    report.failed += 1;
                    continue;
                }
            };

            if queried && !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            queried = true;

            match self.sync(&current).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!(voucher = %current.code, error = %e, "Reconciliation failed for voucher");
                    report.failed += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            confirmed = report.confirmed,
            conflicts = report.conflicts,
            not_yet_used = report.not_yet_used,
            query_errors = report.query_errors,
            superseded = report.superseded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.lock.is_running()
    }

    async fn query(&self, code: &str) -> std::result::Result<IssuerSituation, String> {
        let timeout = self.config.query_timeout();
        match tokio::time::timeout(timeout, self.issuer.query_situation(code)).await {
            Ok(Ok(situation)) => Ok(situation),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("issuer query timed out after {}s", timeout.as_secs())),
        }
    }

    async fn confirm(&self, voucher: &Voucher, situation: &IssuerSituation) -> Result<SyncOutcome> {
        let now = Utc::now();
        let used_at = situation.issued_at.unwrap_or(now);
        let change = VoucherChange::confirm_used(voucher, used_at);
        let log = NewLogEntry::new(
            voucher.id,
            LogAction::ReconcileConfirmed,
            format!(
                "issuer confirmed issuance to {} ({}) at {}",
                voucher.client_name.as_deref().unwrap_or("-"),
                voucher.client_document.as_deref().unwrap_or("-"),
                used_at.to_rfc3339(),
            ),
            None,
            now,
        );

        if !self.store.conditional_transition(
            voucher.id,
            Expectation::observed(voucher),
            &change,
            &log,
        )? {
            debug!(voucher = %voucher.code, "Confirmation superseded");
            return Ok(SyncOutcome::Superseded);
        }
        info!(voucher = %voucher.code, used_at = %used_at, "Voucher use confirmed");

        if let Some(request_id) = voucher.linked_request_id {
            let notice = CompletionNotice::new(
                request_id,
                voucher.id,
                &voucher.code,
                used_at,
                CompletionOutcome::Issued,
            );
            if let Err(e) = self.notifier.notify(&notice).await {
                warn!(voucher = %voucher.code, request = %request_id, error = %e, "Completion notice failed");
            }
        }
        Ok(SyncOutcome::ConfirmedOwner)
    }
}

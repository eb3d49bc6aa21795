//! Ownership conflict resolution.
//!
//! Runs when the external authority reports a voucher consumed by someone
//! other than the locally recorded holder. The authority is the ground truth:
//! the voucher is detached from its request, takes the observed identity and
//! becomes USED. Finding the original request a replacement voucher is left to
//! the operator.

use std::sync::Arc;

use certvoucher_gateway::{CompletionNotice, CompletionNotifier, CompletionOutcome};
use certvoucher_store::VoucherStore;
use certvoucher_types::{
    Expectation, LogAction, NewLogEntry, Result, Voucher, VoucherChange, VoucherError,
    VoucherStatus, constants, normalize_optional_document, normalize_optional_name,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// What [`ConflictResolver::resolve`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Ownership reassigned; the voucher is now USED.
    Reassigned,
    /// The voucher was already USED. Nothing changed.
    AlreadyUsed,
    /// The voucher changed under us (recycled or reconciled concurrently).
    Superseded,
}

pub struct ConflictResolver {
    store: Arc<dyn VoucherStore>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn VoucherStore>, notifier: Arc<dyn CompletionNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Reassign `voucher` to the externally observed owner.
    ///
    /// `voucher` is the snapshot the caller classified; the transition only
    /// commits if the stored voucher still matches it.
    ///
    /// # Errors
    /// - `NotReconcilable` if the voucher is not ALLOCATED (and not USED)
    /// - `Persistence` on storage failure
    pub async fn resolve(
        &self,
        voucher: &Voucher,
        observed_name: Option<&str>,
        observed_document: Option<&str>,
        issued_at: Option<DateTime<Utc>>,
    ) -> Result<Resolution> {
        match voucher.status {
            VoucherStatus::Used => {
                debug!(voucher = %voucher.code, "Conflict on USED voucher ignored");
                return Ok(Resolution::AlreadyUsed);
            }
            VoucherStatus::Allocated => {}
            status => {
                return Err(VoucherError::NotReconcilable {
                    id: voucher.id,
                    status,
                });
            }
        }

        let owner_name = normalize_optional_name(observed_name)
            .unwrap_or_else(|| constants::UNIDENTIFIED_OWNER.to_string());
        let owner_document = normalize_optional_document(observed_document)
            .unwrap_or_else(|| constants::UNIDENTIFIED_OWNER.to_string());
        let now = Utc::now();
        let used_at = issued_at.unwrap_or(now);

        let change = VoucherChange::reassign_used(voucher, owner_name, owner_document, used_at);
        let description = format!(
            "ownership conflict: allocated to {} ({}) for request {}, issuer reports {} ({}); request detached",
            voucher.client_name.as_deref().unwrap_or("-"),
            voucher.client_document.as_deref().unwrap_or("-"),
            voucher
                .linked_request_id
                .map_or_else(|| "-".to_string(), |r| r.to_string()),
            change.client_name.as_deref().unwrap_or("-"),
            change.client_document.as_deref().unwrap_or("-"),
        );
        let log = NewLogEntry::new(voucher.id, LogAction::Conflict, description, None, now);

        if !self.store.conditional_transition(
            voucher.id,
            Expectation::observed(voucher),
            &change,
            &log,
        )? {
            debug!(voucher = %voucher.code, "Conflict resolution superseded");
            return Ok(Resolution::Superseded);
        }

        info!(
            voucher = %voucher.code,
            original = voucher.client_document.as_deref().unwrap_or("-"),
            observed = change.client_document.as_deref().unwrap_or("-"),
            "Voucher ownership reassigned after conflict"
        );

        if let Some(request_id) = voucher.linked_request_id {
            let notice = CompletionNotice::new(
                request_id,
                voucher.id,
                &voucher.code,
                used_at,
                CompletionOutcome::OwnershipConflict,
            );
            if let Err(e) = self.notifier.notify(&notice).await {
                warn!(voucher = %voucher.code, request = %request_id, error = %e, "Completion notice failed");
            }
        }

        Ok(Resolution::Reassigned)
    }
}

#[cfg(test)]
mod tests {
    use certvoucher_gateway::testing::RecordingNotifier;
    use certvoucher_store::SqliteVoucherStore;
    use certvoucher_types::{ImportRecord, RequestId};

    use super::*;

    fn allocated(store: &SqliteVoucherStore, document: &str) -> Voucher {
        store
            .bulk_insert_ignoring_duplicates(&[ImportRecord::new("C1", "P")], None, Utc::now())
            .unwrap();
        let v = store.find_by_code("C1").unwrap().unwrap();
        let change = VoucherChange::allocate(RequestId::new(), "Fulano", document, None, Utc::now());
        let log = NewLogEntry::new(v.id, LogAction::Allocate, "allocated", None, Utc::now());
        store
            .conditional_transition(v.id, Expectation::observed(&v), &change, &log)
            .unwrap();
        store.get(v.id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn reassigns_and_notifies() {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let resolver = ConflictResolver::new(store.clone(), notifier.clone());
        let v = allocated(&store, "11111111111");

        let res = resolver
            .resolve(&v, Some("Beltrano"), Some("222.222.222-22"), None)
            .await
            .unwrap();
        assert_eq!(res, Resolution::Reassigned);

        let after = store.get(v.id).unwrap().unwrap();
        assert_eq!(after.status, VoucherStatus::Used);
        assert_eq!(after.client_document.as_deref(), Some("22222222222"));
        assert_eq!(after.client_name.as_deref(), Some("BELTRANO"));
        assert!(after.linked_request_id.is_none());
        assert!(after.external_ticket_id.is_none());
        assert!(after.used_at.is_some());

        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].outcome, CompletionOutcome::OwnershipConflict);
        assert_eq!(Some(notices[0].request_id), v.linked_request_id);
    }

    #[tokio::test]
    async fn second_resolution_is_noop() {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let resolver = ConflictResolver::new(store.clone(), Arc::new(RecordingNotifier::new()));
        let v = allocated(&store, "11111111111");

        resolver.resolve(&v, None, Some("2"), None).await.unwrap();
        let used = store.get(v.id).unwrap().unwrap();
        assert_eq!(used.client_name.as_deref(), Some(constants::UNIDENTIFIED_OWNER));

        let again = resolver.resolve(&used, None, Some("3"), None).await.unwrap();
        assert_eq!(again, Resolution::AlreadyUsed);
        // Stale ALLOCATED snapshot loses the conditional transition.
        let stale = resolver.resolve(&v, None, Some("3"), None).await.unwrap();
        assert_eq!(stale, Resolution::Superseded);

        let conflicts = store
            .logs_for(v.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == LogAction::Conflict)
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(store.get(v.id).unwrap().unwrap().client_document.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn name_only_owner_gets_unidentified_document() {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let resolver = ConflictResolver::new(store.clone(), Arc::new(RecordingNotifier::new()));
        let v = allocated(&store, "11111111111");

        let res = resolver.resolve(&v, Some("Beltrano"), None, None).await.unwrap();
        assert_eq!(res, Resolution::Reassigned);

        let used = store.get(v.id).unwrap().unwrap();
        assert_eq!(used.client_name.as_deref(), Some("BELTRANO"));
        assert_eq!(used.client_document.as_deref(), Some(constants::UNIDENTIFIED_OWNER));
        assert!(used.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn notifier_failure_keeps_transition() {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let resolver = ConflictResolver::new(store.clone(), Arc::new(RecordingNotifier::failing()));
        let v = allocated(&store, "11111111111");

        let res = resolver.resolve(&v, Some("X"), Some("9"), None).await.unwrap();
        assert_eq!(res, Resolution::Reassigned);
        assert_eq!(store.get(v.id).unwrap().unwrap().status, VoucherStatus::Used);
    }
}

//! Operator-facing query and trigger surface.

use std::sync::Arc;

use certvoucher_store::VoucherStore;
use certvoucher_types::{
    ActorId, ImportRecord, ImportSummary, LogAction, NewLogEntry, Page, PageRequest, Result,
    Voucher, VoucherError, VoucherFilter, VoucherLogEntry,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{InventoryAudit, InventorySnapshot};
use crate::import::VoucherImporter;
use crate::reconciliation::{ReconciliationService, SyncOutcome};

/// A voucher with its full audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherDetail {
    pub voucher: Voucher,
    pub logs: Vec<VoucherLogEntry>,
}

pub struct OperatorConsole {
    store: Arc<dyn VoucherStore>,
    reconciliation: Arc<ReconciliationService>,
    importer: VoucherImporter,
    audit: InventoryAudit,
}

impl OperatorConsole {
    pub fn new(store: Arc<dyn VoucherStore>, reconciliation: Arc<ReconciliationService>) -> Self {
        Self {
            importer: VoucherImporter::new(Arc::clone(&store)),
            audit: InventoryAudit::new(Arc::clone(&store)),
            store,
            reconciliation,
        }
    }

    pub fn list(&self, filter: &VoucherFilter, page: PageRequest) -> Result<Page<Voucher>> {
        self.store.list(filter, page)
    }

    /// # Errors
    /// `VoucherNotFound` for an unknown code.
    pub fn show(&self, code: &str) -> Result<VoucherDetail> {
        let voucher = self.by_code(code)?;
        let logs = self.store.logs_for(voucher.id)?;
        Ok(VoucherDetail { voucher, logs })
    }

    /// Reconcile one voucher now, outside the scheduled sweep.
    ///
    /// When nothing was committed the check is noted in the voucher's trail
    /// as `MANUAL_SYNC`.
    ///
    /// # Errors
    /// - `VoucherNotFound` for an unknown code
    /// - `NotReconcilable` if the voucher is not ALLOCATED
    pub async fn sync_code(&self, code: &str, actor: Option<ActorId>) -> Result<SyncOutcome> {
        let voucher = self.by_code(code)?;
        let outcome = self.reconciliation.sync(&voucher).await?;
        let note = match &outcome {
            SyncOutcome::NotYetUsed => Some("issuer shows no use yet".to_string()),
            SyncOutcome::QueryError(reason) => Some(format!("issuer query failed: {reason}")),
            SyncOutcome::Superseded => Some("voucher changed concurrently".to_string()),
            SyncOutcome::ConfirmedOwner | SyncOutcome::ConflictingOwner => None,
        };
        if let Some(note) = note {
            let entry = NewLogEntry::new(
                voucher.id,
                LogAction::ManualSync,
                format!("manual sync: {note}"),
                actor,
                Utc::now(),
            );
            self.store.append_log(&entry)?;
        }
        info!(
            voucher = %voucher.code,
            actor = ?actor,
            outcome = ?outcome,
            "On-demand reconciliation"
        );
        Ok(outcome)
    }

    pub fn snapshot(&self) -> Result<InventorySnapshot> {
        self.audit.snapshot()
    }

    pub fn import(&self, records: &[ImportRecord], actor: Option<ActorId>) -> Result<ImportSummary> {
        self.importer.import(records, actor)
    }

    /// Import a JSON feed (see [`VoucherImporter::import_json`]).
    pub fn import_json(&self, raw: &str, actor: Option<ActorId>) -> Result<ImportSummary> {
        self.importer.import_json(raw, actor)
    }

    fn by_code(&self, code: &str) -> Result<Voucher> {
        let code = code.trim();
        self.store
            .find_by_code(code)?
            .ok_or_else(|| VoucherError::VoucherNotFound(code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use certvoucher_gateway::testing::{RecordingNotifier, Reply, ScriptedIssuer};
    use certvoucher_store::SqliteVoucherStore;
    use certvoucher_types::{
        AllocationConfig, GENESIS_DIGEST, IssuerSituation, ReconciliationConfig, RequestId,
        VoucherStatus,
    };
    use chrono::Utc;

    use super::*;
    use crate::allocation::{AllocationEngine, AllocationRequest};

    fn console() -> (Arc<SqliteVoucherStore>, Arc<ScriptedIssuer>, OperatorConsole) {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let issuer = Arc::new(ScriptedIssuer::new());
        let reconciliation = Arc::new(ReconciliationService::new(
            store.clone(),
            issuer.clone(),
            Arc::new(RecordingNotifier::new()),
            ReconciliationConfig {
                call_delay_ms: 0,
                ..ReconciliationConfig::default()
            },
        ));
        let console = OperatorConsole::new(store.clone(), reconciliation);
        (store, issuer, console)
    }

    #[test]
    fn import_list_and_show() {
        let (_, _, console) = console();
        let records = [ImportRecord::new("AAA-1", "E-CPF-A1"), ImportRecord::new("BBB-2", "E-CPF-A1")];
        assert_eq!(console.import(&records, None).unwrap().inserted, 2);

        let page = console
            .list(&VoucherFilter::with_status(VoucherStatus::Available), PageRequest::new(1, 1))
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);

        let detail = console.show(" BBB-2 ").unwrap();
        assert_eq!(detail.voucher.code, "BBB-2");
        assert_eq!(detail.logs.len(), 1);
        assert_eq!(detail.logs[0].action, LogAction::Import);

        assert!(matches!(
            console.show("NOPE").unwrap_err(),
            VoucherError::VoucherNotFound(_)
        ));
        assert_eq!(console.snapshot().unwrap().allocatable, 2);
    }

    #[tokio::test]
    async fn sync_by_code() {
        let (store, issuer, console) = console();
        console.import(&[ImportRecord::new("C-1", "P")], None).unwrap();
        assert!(matches!(
            console.sync_code("C-1", None).await.unwrap_err(),
            VoucherError::NotReconcilable { .. }
        ));

        let engine = AllocationEngine::new(store.clone(), AllocationConfig::default());
        let req = AllocationRequest::new(RequestId::new(), "Fulano", "123").with_ticket("T-1");
        let v = engine.allocate(&req).unwrap();
        issuer.situation(
            "C-1",
            IssuerSituation::observed(Some(Utc::now()), Some("FULANO"), Some("1.2.3")),
        );

        let outcome = console.sync_code("C-1", Some(ActorId::new())).await.unwrap();
        assert_eq!(outcome, SyncOutcome::ConfirmedOwner);
        assert_eq!(store.get(v.id).unwrap().unwrap().status, VoucherStatus::Used);

        // A committed transition carries its own entry; no note is added.
        let actions: Vec<_> = store.logs_for(v.id).unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [LogAction::Import, LogAction::Allocate, LogAction::ReconcileConfirmed]
        );
    }

    #[tokio::test]
    async fn unchanged_sync_is_noted_in_trail() {
        let (store, issuer, console) = console();
        console.import(&[ImportRecord::new("N-1", "P")], None).unwrap();
        let engine = AllocationEngine::new(store.clone(), AllocationConfig::default());
        let v = engine
            .allocate(&AllocationRequest::new(RequestId::new(), "Fulano", "123").with_ticket("T-1"))
            .unwrap();

        let operator = ActorId::new();
        let outcome = console.sync_code("N-1", Some(operator)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::NotYetUsed);

        issuer.set("N-1", Reply::Status(503));
        let outcome = console.sync_code("N-1", Some(operator)).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::QueryError(_)));

        let after = store.get(v.id).unwrap().unwrap();
        assert_eq!(after.status, VoucherStatus::Allocated);
        assert_eq!(after.revision, v.revision);

        let notes: Vec<_> = store
            .logs_for(v.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == LogAction::ManualSync)
            .collect();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|e| e.actor_id == Some(operator)));
        assert!(notes[1].description.contains("query failed"));

        // Notes extend the same digest chain as transitions.
        let trail = store.log_trail().unwrap();
        let mut previous = GENESIS_DIGEST;
        for entry in &trail {
            assert!(entry.verify_chain(&previous), "chain broken at {}", entry.sequence);
            previous = entry.digest;
        }
        assert!(console.audit.run().unwrap().is_clean());
    }
}

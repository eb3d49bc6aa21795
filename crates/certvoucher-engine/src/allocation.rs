//! Voucher allocation.
//!
//! Binds one RECYCLABLE (preferred) or AVAILABLE voucher to a client request:
//!
//! 1. Validate the request (identity present, external case when required)
//! 2. Return the request's current voucher if it already holds one
//! 3. Pick a candidate, then claim it with a conditional transition pinned to
//!    the observed status and revision
//! 4. On a lost race, retry with a fresh candidate (bounded)
//!
//! There is no read-then-write window: two allocators racing for the same
//! candidate both issue the conditional transition, and the store lets
//! exactly one of them commit.

use std::sync::Arc;

use certvoucher_store::VoucherStore;
use certvoucher_types::{
    ActorId, AllocationConfig, Expectation, LogAction, NewLogEntry, RequestId, Result, Voucher,
    VoucherChange, VoucherError, VoucherStatus, normalize_document, normalize_name,
};
use chrono::Utc;
use tracing::{debug, info};

/// A client request asking for a voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub request_id: RequestId,
    pub client_name: String,
    pub client_document: String,
    /// The external authority's case for this request.
    pub external_ticket_id: Option<String>,
    /// Operator performing the allocation; `None` for system calls.
    pub actor: Option<ActorId>,
}

impl AllocationRequest {
    #[must_use]
    pub fn new(
        request_id: RequestId,
        client_name: impl Into<String>,
        client_document: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            client_name: client_name.into(),
            client_document: client_document.into(),
            external_ticket_id: None,
            actor: None,
        }
    }

    #[must_use]
    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.external_ticket_id = Some(ticket.into());
        self
    }

    #[must_use]
    pub fn by(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }
}

/// Assigns vouchers to client requests.
pub struct AllocationEngine {
    store: Arc<dyn VoucherStore>,
    config: AllocationConfig,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn VoucherStore>, config: AllocationConfig) -> Self {
        Self { store, config }
    }

    /// Allocate a voucher to `request`.
    ///
    /// Idempotent per request: a request that already holds an ALLOCATED
    /// voucher gets that voucher back.
    ///
    /// # Errors
    /// - `InvalidRequest` if identity or the external case is missing, or the
    ///   request's voucher was already consumed
    /// - `OutOfStock` if no RECYCLABLE or AVAILABLE voucher is left
    /// - `AllocationContention` if every attempt lost its candidate
    /// - `Persistence` on storage failure
    pub fn allocate(&self, request: &AllocationRequest) -> Result<Voucher> {
        let ticket = self.validate(request)?;

        if let Some(existing) = self.store.find_by_request(request.request_id)? {
            return self.existing_allocation(request.request_id, existing);
        }

        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let Some(candidate) = self.store.find_allocatable()? else {
                debug!(request = %request.request_id, attempt, "no allocatable voucher");
                return Err(VoucherError::OutOfStock);
            };

            let now = Utc::now();
            let change = VoucherChange::allocate(
                request.request_id,
                &request.client_name,
                &request.client_document,
                ticket.clone(),
                now,
            );
            let action = if candidate.status == VoucherStatus::Recyclable {
                LogAction::Reallocate
            } else {
                LogAction::Allocate
            };
            let log = NewLogEntry::new(
                candidate.id,
                action,
                describe(action, request, &change),
                request.actor,
                now,
            );

            match self.store.conditional_transition(
                candidate.id,
                Expectation::observed(&candidate),
                &change,
                &log,
            ) {
                Ok(true) => {
                    info!(
                        voucher = %candidate.code,
                        request = %request.request_id,
                        action = %action,
                        attempt,
                        "Voucher allocated"
                    );
                    return self
                        .store
                        .get(candidate.id)?
                        .ok_or_else(|| VoucherError::VoucherNotFound(candidate.id.to_string()));
                }
                Ok(false) => {
                    debug!(
                        voucher = %candidate.code,
                        request = %request.request_id,
                        attempt,
                        "Candidate claimed concurrently, retrying"
                    );
                }
                // A concurrent call for the same request committed first.
                Err(VoucherError::RequestAlreadyLinked(request_id)) => {
                    return match self.store.find_by_request(request_id)? {
                        Some(existing) => self.existing_allocation(request_id, existing),
                        None => Err(VoucherError::RequestAlreadyLinked(request_id)),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        Err(VoucherError::AllocationContention { attempts })
    }

    /// Returns the normalized external ticket.
    fn validate(&self, request: &AllocationRequest) -> Result<Option<String>> {
        if normalize_name(&request.client_name).is_empty() {
            return Err(invalid("client name is empty"));
        }
        if normalize_document(&request.client_document).is_empty() {
            return Err(invalid("client document has no digits"));
        }
        let ticket = request
            .external_ticket_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if ticket.is_none() && self.config.require_external_ticket {
            return Err(invalid("request has no external authority case yet"));
        }
        Ok(ticket)
    }

    fn existing_allocation(&self, request_id: RequestId, existing: Voucher) -> Result<Voucher> {
        if existing.status == VoucherStatus::Allocated {
            debug!(voucher = %existing.code, request = %request_id, "Request already holds a voucher");
            Ok(existing)
        } else {
            Err(invalid(format!(
                "request {request_id} already consumed voucher {}",
                existing.code
            )))
        }
    }
}

fn invalid(reason: impl Into<String>) -> VoucherError {
    VoucherError::InvalidRequest {
        reason: reason.into(),
    }
}

fn describe(action: LogAction, request: &AllocationRequest, change: &VoucherChange) -> String {
    let verb = match action {
        LogAction::Reallocate => "reallocated from recycled stock",
        _ => "allocated",
    };
    format!(
        "{verb} to {} ({}) for request {}{}",
        change.client_name.as_deref().unwrap_or_default(),
        change.client_document.as_deref().unwrap_or_default(),
        request.request_id,
        change
            .external_ticket_id
            .as_deref()
            .map(|t| format!(", external case {t}"))
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use certvoucher_store::SqliteVoucherStore;
    use certvoucher_types::ImportRecord;

    use super::*;

    fn engine_with(codes: &[&str]) -> (Arc<SqliteVoucherStore>, AllocationEngine) {
        let store = Arc::new(SqliteVoucherStore::in_memory().unwrap());
        let records: Vec<_> = codes.iter().map(|c| ImportRecord::new(*c, "E-CPF-A1")).collect();
        store
            .bulk_insert_ignoring_duplicates(&records, None, Utc::now())
            .unwrap();
        let engine = AllocationEngine::new(store.clone(), AllocationConfig::default());
        (store, engine)
    }

    fn request() -> AllocationRequest {
        AllocationRequest::new(RequestId::new(), "fulano de tal", "123.456.789-00").with_ticket("TCK-1")
    }

    #[test]
    fn allocates_and_normalizes() {
        let (store, engine) = engine_with(&["A1"]);
        let req = request();
        let v = engine.allocate(&req).unwrap();
        assert_eq!(v.status, VoucherStatus::Allocated);
        assert_eq!(v.client_name.as_deref(), Some("FULANO DE TAL"));
        assert_eq!(v.client_document.as_deref(), Some("12345678900"));
        assert_eq!(v.linked_request_id, Some(req.request_id));
        assert_eq!(v.external_ticket_id.as_deref(), Some("TCK-1"));

        let logs = store.logs_for(v.id).unwrap();
        assert_eq!(logs.last().unwrap().action, LogAction::Allocate);
    }

    #[test]
    fn empty_pool_is_out_of_stock() {
        let (store, engine) = engine_with(&[]);
        let err = engine.allocate(&request()).unwrap_err();
        assert!(matches!(err, VoucherError::OutOfStock));
        assert!(store.log_trail().unwrap().is_empty());
    }

    #[test]
    fn missing_identity_is_invalid() {
        let (_, engine) = engine_with(&["A1"]);
        let req = AllocationRequest::new(RequestId::new(), "  ", "123").with_ticket("T");
        assert!(matches!(
            engine.allocate(&req).unwrap_err(),
            VoucherError::InvalidRequest { .. }
        ));
        let req = AllocationRequest::new(RequestId::new(), "Fulano", "n/a").with_ticket("T");
        assert!(matches!(
            engine.allocate(&req).unwrap_err(),
            VoucherError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn missing_ticket_is_invalid_when_required() {
        let (store, engine) = engine_with(&["A1"]);
        let req = AllocationRequest::new(RequestId::new(), "Fulano", "1");
        assert!(matches!(
            engine.allocate(&req).unwrap_err(),
            VoucherError::InvalidRequest { .. }
        ));

        let relaxed = AllocationEngine::new(
            store,
            AllocationConfig {
                require_external_ticket: false,
                ..AllocationConfig::default()
            },
        );
        assert!(relaxed.allocate(&req).is_ok());
    }

    #[test]
    fn same_request_gets_same_voucher() {
        let (store, engine) = engine_with(&["A1", "A2"]);
        let req = request();
        let first = engine.allocate(&req).unwrap();
        let second = engine.allocate(&req).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.count_by_status().unwrap().get(VoucherStatus::Allocated), 1);
    }

    #[test]
    fn recyclable_is_reallocated_first() {
        let (store, engine) = engine_with(&["A1", "A2"]);
        let first = engine.allocate(&request()).unwrap();
        let log = NewLogEntry::new(first.id, LogAction::Recycle, "recycled", None, Utc::now());
        assert!(store
            .conditional_transition(
                first.id,
                Expectation::observed(&first),
                &VoucherChange::recycle(),
                &log,
            )
            .unwrap());

        let again = engine.allocate(&request()).unwrap();
        assert_eq!(again.id, first.id);
        let logs = store.logs_for(again.id).unwrap();
        assert_eq!(logs.last().unwrap().action, LogAction::Reallocate);
    }
}

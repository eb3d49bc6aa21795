//! # Voucher: the prepaid, single-use issuance entitlement
//!
//! A `Voucher` is a uniquely coded right to have one certificate issued by
//! the external certification authority. Local state records who we think
//! holds it; the authority decides whether and by whom it was consumed.
//!
//! ## State Machine
//!
//! ```text
//!   ┌───────────┐  allocate   ┌───────────┐  reconcile (confirmed │ conflict)  ┌──────┐
//!   │ AVAILABLE ├────────────▶│ ALLOCATED ├───────────────────────────────────▶│ USED │
//!   └───────────┘             └──┬─────▲──┘                                    └──────┘
//!                     sweep      │     │ allocate
//!                     timeout    ▼     │
//!                             ┌────────┴───┐
//!                             │ RECYCLABLE │
//!                             └────────────┘
//! ```
//!
//! ## Invariants
//!
//! - **Terminal**: USED has no outgoing transitions
//! - **Identity**: client name/document are set iff status ∈ {ALLOCATED, USED}
//! - **Single link**: a request is linked to at most one voucher (enforced by the store)
//! - **Audited**: every transition is committed together with one log entry

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{RequestId, VoucherError, VoucherId, normalize_document, normalize_name};

/// The lifecycle state of a voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherStatus {
    /// Imported and never handed out.
    Available,
    /// Handed out once, reclaimed after the grace period. Preferred by allocation.
    Recyclable,
    /// Bound to one in-flight client request.
    Allocated,
    /// The external authority reports it consumed. **Terminal.**
    Used,
}

impl VoucherStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Available, Self::Recyclable, Self::Allocated, Self::Used];

    /// Can a voucher in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Available | Self::Recyclable, Self::Allocated)
                | (Self::Allocated, Self::Recyclable | Self::Used)
        )
    }

    /// `true` for statuses that may be picked by allocation.
    #[must_use]
    pub fn is_allocatable(&self) -> bool {
        matches!(self, Self::Available | Self::Recyclable)
    }

    /// `true` for statuses that must carry a client identity.
    #[must_use]
    pub fn carries_identity(&self) -> bool {
        matches!(self, Self::Allocated | Self::Used)
    }

    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Recyclable => "RECYCLABLE",
            Self::Allocated => "ALLOCATED",
            Self::Used => "USED",
        }
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoucherStatus {
    type Err = VoucherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(Self::Available),
            "RECYCLABLE" => Ok(Self::Recyclable),
            "ALLOCATED" => Ok(Self::Allocated),
            "USED" => Ok(Self::Used),
            other => Err(VoucherError::Serialization(format!(
                "unknown voucher status {other:?}"
            ))),
        }
    }
}

/// A voucher record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Opaque identity.
    pub id: VoucherId,
    /// Globally unique physical/external voucher code.
    pub code: String,
    /// Descriptive product code (certificate type). Not used in logic.
    pub product_code: String,
    /// Current lifecycle state.
    pub status: VoucherStatus,
    /// The request this voucher is bound to.
    pub linked_request_id: Option<RequestId>,
    /// The external authority's case for the linked request.
    pub external_ticket_id: Option<String>,
    /// Holder name: assigned client, or the observed owner after a conflict.
    pub client_name: Option<String>,
    /// Holder tax ID, digits only.
    pub client_document: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every committed transition.
    pub revision: u64,
}

impl Voucher {
    /// A freshly imported, never allocated voucher.
    #[must_use]
    pub fn imported(code: impl Into<String>, product_code: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: VoucherId::new(),
            code: code.into(),
            product_code: product_code.into(),
            status: VoucherStatus::Available,
            linked_request_id: None,
            external_ticket_id: None,
            client_name: None,
            client_document: None,
            allocated_at: None,
            used_at: None,
            created_at: at,
            updated_at: at,
            revision: 0,
        }
    }

    /// `true` once the voucher reached USED.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status == VoucherStatus::Used
    }

    /// How long the voucher has been allocated, if it is.
    #[must_use]
    pub fn allocation_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        match (self.status, self.allocated_at) {
            (VoucherStatus::Allocated, Some(at)) => Some(now - at),
            _ => None,
        }
    }

    /// Check the identity invariants for the record as stored.
    ///
    /// # Errors
    /// Returns `Internal` describing the first violated invariant.
    pub fn check_invariants(&self) -> crate::Result<()> {
        check_shape(
            self.status,
            self.linked_request_id.is_some(),
            self.client_name.as_deref(),
            self.client_document.as_deref(),
            self.used_at.is_some(),
        )
        .map_err(|reason| VoucherError::Internal(format!("voucher {} ({}): {reason}", self.code, self.id)))
    }
}

/// What a conditional transition expects to find in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub status: VoucherStatus,
    /// When set, the stored revision must match too.
    pub revision: Option<u64>,
}

impl Expectation {
    /// Match on status only.
    #[must_use]
    pub fn status(status: VoucherStatus) -> Self {
        Self {
            status,
            revision: None,
        }
    }

    /// Match the exact snapshot the caller observed (status and revision).
    #[must_use]
    pub fn observed(voucher: &Voucher) -> Self {
        Self {
            status: voucher.status,
            revision: Some(voucher.revision),
        }
    }
}

/// The full set of mutable fields written by a transition.
///
/// Built only through the constructors below so every change respects the
/// identity invariants of its target status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherChange {
    pub to: VoucherStatus,
    pub linked_request_id: Option<RequestId>,
    pub external_ticket_id: Option<String>,
    pub client_name: Option<String>,
    pub client_document: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
}

impl VoucherChange {
    /// Bind a voucher to a client request. Name and document are normalized.
    #[must_use]
    pub fn allocate(
        request_id: RequestId,
        client_name: &str,
        client_document: &str,
        external_ticket_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            to: VoucherStatus::Allocated,
            linked_request_id: Some(request_id),
            external_ticket_id,
            client_name: Some(normalize_name(client_name)),
            client_document: Some(normalize_document(client_document)),
            allocated_at: Some(at),
            used_at: None,
        }
    }

    /// The authority confirmed the locally recorded owner.
    #[must_use]
    pub fn confirm_used(voucher: &Voucher, used_at: DateTime<Utc>) -> Self {
        Self {
            to: VoucherStatus::Used,
            linked_request_id: voucher.linked_request_id,
            external_ticket_id: voucher.external_ticket_id.clone(),
            client_name: voucher.client_name.clone(),
            client_document: voucher.client_document.clone(),
            allocated_at: voucher.allocated_at,
            used_at: Some(used_at),
        }
    }

    /// The authority reports a different owner: detach from the request and
    /// record the observed identity.
    #[must_use]
    pub fn reassign_used(
        voucher: &Voucher,
        owner_name: String,
        owner_document: String,
        used_at: DateTime<Utc>,
    ) -> Self {
        Self {
            to: VoucherStatus::Used,
            linked_request_id: None,
            external_ticket_id: None,
            client_name: Some(owner_name),
            client_document: Some(owner_document),
            allocated_at: voucher.allocated_at,
            used_at: Some(used_at),
        }
    }

    /// Reclaim an unused allocation.
    #[must_use]
    pub fn recycle() -> Self {
        Self {
            to: VoucherStatus::Recyclable,
            linked_request_id: None,
            external_ticket_id: None,
            client_name: None,
            client_document: None,
            allocated_at: None,
            used_at: None,
        }
    }

    /// Validate this change against the state machine and identity invariants.
    ///
    /// # Errors
    /// - `InvalidTransition` if `from` cannot move to the target status
    /// - `Internal` if the written fields violate the target's invariants
    pub fn validate_from(&self, from: VoucherStatus) -> crate::Result<()> {
        if !from.can_transition_to(self.to) {
            return Err(VoucherError::InvalidTransition { from, to: self.to });
        }
        check_shape(
            self.to,
            self.linked_request_id.is_some(),
            self.client_name.as_deref(),
            self.client_document.as_deref(),
            self.used_at.is_some(),
        )
        .map_err(|reason| VoucherError::Internal(format!("change to {}: {reason}", self.to)))
    }
}

fn check_shape(
    status: VoucherStatus,
    has_link: bool,
    name: Option<&str>,
    document: Option<&str>,
    has_used_at: bool,
) -> std::result::Result<(), &'static str> {
    if status.carries_identity() {
        match (name, document) {
            (Some(n), Some(d)) if n.trim().is_empty() || d.trim().is_empty() => {
                return Err("client identity blank");
            }
            (Some(_), Some(_)) => {}
            _ => return Err("client identity missing"),
        }
    } else if name.is_some() || document.is_some() {
        return Err("client identity present on unassigned voucher");
    }
    if status == VoucherStatus::Allocated && !has_link {
        return Err("allocated voucher without linked request");
    }
    if status.is_allocatable() && has_link {
        return Err("unassigned voucher linked to a request");
    }
    if (status == VoucherStatus::Used) != has_used_at {
        return Err("used_at must be set exactly when USED");
    }
    Ok(())
}

/// Dummy vouchers for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Voucher {
    /// An AVAILABLE voucher with a random code.
    pub fn dummy() -> Self {
        Self::imported(
            format!("VCH-{:08X}", rand::random::<u32>()),
            "E-CPF-A3",
            Utc::now(),
        )
    }

    /// An ALLOCATED voucher held by `document`, allocated at `at`.
    pub fn dummy_allocated(document: &str, at: DateTime<Utc>) -> Self {
        let mut voucher = Self::dummy();
        voucher.status = VoucherStatus::Allocated;
        voucher.linked_request_id = Some(RequestId::new());
        voucher.external_ticket_id = Some(format!("TCK-{}", rand::random::<u16>()));
        voucher.client_name = Some("FULANO DE TAL".to_string());
        voucher.client_document = Some(normalize_document(document));
        voucher.allocated_at = Some(at);
        voucher.revision = 1;
        voucher
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(VoucherStatus::Available.can_transition_to(VoucherStatus::Allocated));
        assert!(VoucherStatus::Recyclable.can_transition_to(VoucherStatus::Allocated));
        assert!(VoucherStatus::Allocated.can_transition_to(VoucherStatus::Recyclable));
        assert!(VoucherStatus::Allocated.can_transition_to(VoucherStatus::Used));
    }

    #[test]
    fn used_is_terminal() {
        for target in VoucherStatus::ALL {
            assert!(
                !VoucherStatus::Used.can_transition_to(target),
                "USED -> {target} must be rejected"
            );
        }
    }

    #[test]
    fn unassigned_cannot_skip_to_used() {
        assert!(!VoucherStatus::Available.can_transition_to(VoucherStatus::Used));
        assert!(!VoucherStatus::Recyclable.can_transition_to(VoucherStatus::Used));
        assert!(!VoucherStatus::Available.can_transition_to(VoucherStatus::Recyclable));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in VoucherStatus::ALL {
            assert_eq!(status.as_str().parse::<VoucherStatus>().unwrap(), status);
        }
        assert!("SPENT".parse::<VoucherStatus>().is_err());
        let json = serde_json::to_string(&VoucherStatus::Recyclable).unwrap();
        assert_eq!(json, "\"RECYCLABLE\"");
    }

    #[test]
    fn allocate_change_normalizes_identity() {
        let change = VoucherChange::allocate(
            RequestId::new(),
            " maria  silva ",
            "123.456.789-00",
            Some("TCK-1".into()),
            Utc::now(),
        );
        assert_eq!(change.client_name.as_deref(), Some("MARIA SILVA"));
        assert_eq!(change.client_document.as_deref(), Some("12345678900"));
        assert!(change.validate_from(VoucherStatus::Available).is_ok());
        assert!(change.validate_from(VoucherStatus::Recyclable).is_ok());
    }

    #[test]
    fn allocate_change_rejected_from_used() {
        let change = VoucherChange::allocate(RequestId::new(), "a", "1", None, Utc::now());
        let err = change.validate_from(VoucherStatus::Used).unwrap_err();
        assert!(matches!(err, VoucherError::InvalidTransition { .. }));
    }

    #[test]
    fn recycle_clears_identity() {
        let change = VoucherChange::recycle();
        assert!(change.client_name.is_none());
        assert!(change.client_document.is_none());
        assert!(change.linked_request_id.is_none());
        assert!(change.allocated_at.is_none());
        assert!(change.validate_from(VoucherStatus::Allocated).is_ok());
    }

    #[test]
    fn reassign_detaches_request() {
        let voucher = Voucher::dummy_allocated("11111111111", Utc::now());
        let change = VoucherChange::reassign_used(
            &voucher,
            "OUTRO".into(),
            "22222222222".into(),
            Utc::now(),
        );
        assert!(change.linked_request_id.is_none());
        assert!(change.external_ticket_id.is_none());
        assert_eq!(change.client_document.as_deref(), Some("22222222222"));
        assert!(change.validate_from(VoucherStatus::Allocated).is_ok());
    }

    #[test]
    fn confirm_keeps_request_link() {
        let voucher = Voucher::dummy_allocated("12345678900", Utc::now());
        let change = VoucherChange::confirm_used(&voucher, Utc::now());
        assert_eq!(change.linked_request_id, voucher.linked_request_id);
        assert_eq!(change.client_document, voucher.client_document);
        assert!(change.validate_from(VoucherStatus::Allocated).is_ok());
    }

    #[test]
    fn invariants_flag_identity_on_available() {
        let mut voucher = Voucher::dummy();
        assert!(voucher.check_invariants().is_ok());
        voucher.client_name = Some("GHOST".into());
        assert!(voucher.check_invariants().is_err());
    }

    #[test]
    fn invariants_flag_blank_identity_on_used() {
        let voucher = Voucher::dummy_allocated("11111111111", Utc::now());
        let change = VoucherChange::reassign_used(&voucher, "OUTRO".into(), String::new(), Utc::now());
        assert!(change.validate_from(VoucherStatus::Allocated).is_err());

        let mut used = voucher;
        used.status = VoucherStatus::Used;
        used.used_at = Some(Utc::now());
        used.linked_request_id = None;
        assert!(used.check_invariants().is_ok());
        used.client_document = Some("  ".into());
        assert!(used.check_invariants().is_err());
    }

    #[test]
    fn allocation_age_only_when_allocated() {
        let at = Utc::now() - Duration::days(2);
        let voucher = Voucher::dummy_allocated("1", at);
        let age = voucher.allocation_age(Utc::now()).unwrap();
        assert!(age >= Duration::days(2));
        assert!(Voucher::dummy().allocation_age(Utc::now()).is_none());
    }

    #[test]
    fn observed_expectation_pins_revision() {
        let voucher = Voucher::dummy_allocated("1", Utc::now());
        let exp = Expectation::observed(&voucher);
        assert_eq!(exp.status, VoucherStatus::Allocated);
        assert_eq!(exp.revision, Some(1));
        assert_eq!(Expectation::status(VoucherStatus::Available).revision, None);
    }
}

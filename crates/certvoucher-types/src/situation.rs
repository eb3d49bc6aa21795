//! Canonical view of the external authority's answer for one voucher code.
//!
//! The authority's raw payload is inconsistent (plain object or string-encoded
//! JSON, varying field names, punctuated tax IDs). The gateway normalizes it
//! into an [`IssuerSituation`]; the engine never sees anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{normalize_optional_document, normalize_optional_name};

/// Whether the authority could answer the query at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Failure(String),
}

impl QueryStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Normalized issuance status of a voucher at the external authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerSituation {
    /// When the certificate was issued with this voucher.
    pub issued_at: Option<DateTime<Utc>>,
    /// Tax ID of the certificate owner, digits only.
    pub owner_document: Option<String>,
    /// Owner name, uppercased.
    pub owner_name: Option<String>,
    pub query_status: QueryStatus,
}

impl IssuerSituation {
    /// Build a successful situation, normalizing the owner identity.
    #[must_use]
    pub fn observed(
        issued_at: Option<DateTime<Utc>>,
        owner_name: Option<&str>,
        owner_document: Option<&str>,
    ) -> Self {
        Self {
            issued_at,
            owner_document: normalize_optional_document(owner_document),
            owner_name: normalize_optional_name(owner_name),
            query_status: QueryStatus::Success,
        }
    }

    /// The authority knows the code but nothing was issued with it yet.
    #[must_use]
    pub fn unused() -> Self {
        Self::observed(None, None, None)
    }

    /// The authority refused or failed to answer.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            issued_at: None,
            owner_document: None,
            owner_name: None,
            query_status: QueryStatus::Failure(reason.into()),
        }
    }

    /// `true` when the authority reported any owner identity.
    #[must_use]
    pub fn has_owner(&self) -> bool {
        self.owner_document.is_some() || self.owner_name.is_some()
    }

    /// `true` when the answer shows any sign of the voucher having been used.
    #[must_use]
    pub fn shows_usage(&self) -> bool {
        self.issued_at.is_some() || self.has_owner()
    }
}

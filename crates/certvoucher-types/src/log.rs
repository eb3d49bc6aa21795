//! Append-only voucher audit trail.
//!
//! Every voucher transition produces exactly one [`VoucherLogEntry`]. An
//! operator-triggered sync that changes nothing leaves a `MANUAL_SYNC` note.
//! Entries are never mutated. The store assigns each entry a sequence number and a
//! SHA-256 digest chained over the previous entry, so a rewritten history is
//! detectable by recomputing the chain.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ActorId, VoucherError, VoucherId, constants};

/// What happened to the voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    /// Created by bulk import.
    Import,
    /// AVAILABLE → ALLOCATED.
    Allocate,
    /// RECYCLABLE → ALLOCATED.
    Reallocate,
    /// ALLOCATED → USED with ownership reassigned to the observed owner.
    Conflict,
    /// ALLOCATED → USED, owner confirmed by the external authority.
    ReconcileConfirmed,
    /// ALLOCATED → RECYCLABLE after the grace period.
    Recycle,
    /// Operator-triggered reconciliation that left the voucher as it was.
    ManualSync,
}

impl LogAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "IMPORT",
            Self::Allocate => "ALLOCATE",
            Self::Reallocate => "REALLOCATE",
            Self::Conflict => "CONFLICT",
            Self::ReconcileConfirmed => "RECONCILE_CONFIRMED",
            Self::Recycle => "RECYCLE",
            Self::ManualSync => "MANUAL_SYNC",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogAction {
    type Err = VoucherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMPORT" => Ok(Self::Import),
            "ALLOCATE" => Ok(Self::Allocate),
            "REALLOCATE" => Ok(Self::Reallocate),
            "CONFLICT" => Ok(Self::Conflict),
            "RECONCILE_CONFIRMED" => Ok(Self::ReconcileConfirmed),
            "RECYCLE" => Ok(Self::Recycle),
            "MANUAL_SYNC" => Ok(Self::ManualSync),
            other => Err(VoucherError::Serialization(format!(
                "unknown log action {other:?}"
            ))),
        }
    }
}

/// A log entry before the store has sequenced and chained it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub voucher_id: VoucherId,
    pub action: LogAction,
    pub description: String,
    /// `None` means system-initiated.
    pub actor_id: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
}

impl NewLogEntry {
    #[must_use]
    pub fn new(
        voucher_id: VoucherId,
        action: LogAction,
        description: impl Into<String>,
        actor_id: Option<ActorId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            voucher_id,
            action,
            description: description.into(),
            actor_id,
            timestamp,
        }
    }

    /// Chain digest of this entry on top of `previous`.
    ///
    /// Format: `SHA256("certvoucher:log:v1:" || previous || voucher_id || action || 0x00 || description || 0x00 || actor || timestamp_ms)`
    #[must_use]
    pub fn chain_digest(&self, previous: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(constants::LOG_DIGEST_DOMAIN);
        hasher.update(previous);
        hasher.update(self.voucher_id.0.as_bytes());
        hasher.update(self.action.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.description.as_bytes());
        hasher.update([0u8]);
        match self.actor_id {
            Some(actor) => hasher.update(actor.0.as_bytes()),
            None => hasher.update([0u8; 16]),
        }
        hasher.update(self.timestamp.timestamp_millis().to_le_bytes());
        hasher.finalize().into()
    }
}

/// A committed, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherLogEntry {
    /// Store-assigned, strictly increasing position in the trail.
    pub sequence: u64,
    pub voucher_id: VoucherId,
    pub action: LogAction,
    pub description: String,
    pub actor_id: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
    /// Chained SHA-256 over the previous entry's digest.
    pub digest: [u8; 32],
}

impl VoucherLogEntry {
    /// The content fields, as they were before sequencing.
    #[must_use]
    pub fn content(&self) -> NewLogEntry {
        NewLogEntry {
            voucher_id: self.voucher_id,
            action: self.action,
            description: self.description.clone(),
            actor_id: self.actor_id,
            timestamp: self.timestamp,
        }
    }

    /// Does this entry's digest follow from `previous`?
    #[must_use]
    pub fn verify_chain(&self, previous: &[u8; 32]) -> bool {
        self.content().chain_digest(previous) == self.digest
    }

    /// Hex form of the digest, for display.
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Digest preceding the very first entry of a trail.
pub const GENESIS_DIGEST: [u8; 32] = [0u8; 32];

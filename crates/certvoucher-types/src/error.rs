//! Error types for the CertVoucher engine.
//!
//! All errors use the `VC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Allocation errors
//! - 2xx: Voucher state errors
//! - 3xx: External authority errors
//! - 4xx: Import errors
//! - 9xx: General / infrastructure errors

use thiserror::Error;

use crate::{RequestId, VoucherId, VoucherStatus};

/// Central error enum for all CertVoucher operations.
#[derive(Debug, Error)]
pub enum VoucherError {
    // =================================================================
    // Allocation Errors (1xx)
    // =================================================================
    /// No AVAILABLE or RECYCLABLE voucher is left in the pool.
    #[error("VC_ERR_100: Out of stock: no allocatable voucher")]
    OutOfStock,

    /// The request lacks a prerequisite for issuance.
    #[error("VC_ERR_101: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The request is already linked to another voucher.
    #[error("VC_ERR_102: Request {0} is already linked to a voucher")]
    RequestAlreadyLinked(RequestId),

    /// Every allocation attempt lost its candidate to a concurrent allocator.
    #[error("VC_ERR_103: Allocation contention: gave up after {attempts} attempts")]
    AllocationContention { attempts: u32 },

    // =================================================================
    // Voucher State Errors (2xx)
    // =================================================================
    /// The state machine forbids this transition.
    #[error("VC_ERR_200: Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: VoucherStatus,
        to: VoucherStatus,
    },

    /// No voucher with this identity exists.
    #[error("VC_ERR_201: Voucher not found: {0}")]
    VoucherNotFound(String),

    /// Reconciliation only applies to ALLOCATED vouchers.
    #[error("VC_ERR_203: Voucher {id} is {status}, not reconcilable")]
    NotReconcilable { id: VoucherId, status: VoucherStatus },

    /// Another sweep of the same kind is still running.
    #[error("VC_ERR_204: Sweep already in progress: {0}")]
    SweepInProgress(&'static str),

    // =================================================================
    // External Authority Errors (3xx)
    // =================================================================
    /// The external authority could not be queried successfully.
    #[error("VC_ERR_300: Issuer query failed: {reason}")]
    QueryFailed { reason: String },

    /// The authority answered with a payload we could not normalize.
    #[error("VC_ERR_301: Malformed issuer payload: {reason}")]
    MalformedPayload { reason: String },

    // =================================================================
    // Import Errors (4xx)
    // =================================================================
    /// An import record is structurally invalid.
    #[error("VC_ERR_400: Invalid import record: {reason}")]
    InvalidImportRecord { reason: String },

    // =================================================================
    // General / Infrastructure (9xx)
    // =================================================================
    /// The voucher store is unavailable or rejected the operation.
    #[error("VC_ERR_900: Persistence error: {0}")]
    Persistence(String),

    /// Serialization / deserialization error.
    #[error("VC_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("VC_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("VC_ERR_903: I/O error: {0}")]
    Io(String),

    /// Unrecoverable internal error.
    #[error("VC_ERR_904: Internal error: {0}")]
    Internal(String),
}

impl VoucherError {
    /// Business outcomes the caller is expected to handle, as opposed to
    /// infrastructure failures.
    #[must_use]
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::OutOfStock
                | Self::InvalidRequest { .. }
                | Self::RequestAlreadyLinked(_)
                | Self::NotReconcilable { .. }
        )
    }

    /// Errors that a later retry may resolve on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllocationContention { .. }
                | Self::QueryFailed { .. }
                | Self::SweepInProgress(_)
                | Self::Persistence(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, VoucherError>;

impl From<std::io::Error> for VoucherError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VoucherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_stock_display() {
        let msg = format!("{}", VoucherError::OutOfStock);
        assert!(msg.starts_with("VC_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn invalid_transition_display() {
        let err = VoucherError::InvalidTransition {
            from: VoucherStatus::Used,
            to: VoucherStatus::Allocated,
        };
        let msg = format!("{err}");
        assert!(msg.contains("VC_ERR_200"));
        assert!(msg.contains("USED"));
        assert!(msg.contains("ALLOCATED"));
    }

    #[test]
    fn classification() {
        assert!(VoucherError::OutOfStock.is_business());
        assert!(!VoucherError::OutOfStock.is_transient());
        assert!(VoucherError::Persistence("locked".into()).is_transient());
        assert!(!VoucherError::Persistence("locked".into()).is_business());
    }

    #[test]
    fn all_errors_have_vc_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(VoucherError::OutOfStock),
            Box::new(VoucherError::AllocationContention { attempts: 5 }),
            Box::new(VoucherError::NotReconcilable {
                id: VoucherId::new(),
                status: VoucherStatus::Used,
            }),
            Box::new(VoucherError::SweepInProgress("recycling")),
            Box::new(VoucherError::Internal("test".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("VC_ERR_"),
                "Error missing VC_ERR_ prefix: {msg}"
            );
        }
    }
}

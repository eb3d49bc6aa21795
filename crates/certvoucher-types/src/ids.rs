//! Globally unique identifiers used throughout CertVoucher.
//!
//! Voucher IDs use UUIDv7 for time-ordered lexicographic sorting. Request
//! and actor IDs belong to external modules and are carried opaquely.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::VoucherError;

// ---------------------------------------------------------------------------
// VoucherId
// ---------------------------------------------------------------------------

/// Opaque, immutable voucher identity. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct VoucherId(pub Uuid);

impl VoucherId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Extract the embedded timestamp (milliseconds since UNIX epoch) from UUIDv7.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ])
    }
}

impl Default for VoucherId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VoucherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VoucherId {
    type Err = VoucherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| VoucherError::Serialization(format!("invalid voucher id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// Identifier of the client request ("solicitação") a voucher is bound to.
///
/// Owned by the request module; the engine never creates requests, only
/// links and unlinks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = VoucherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("req:").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| VoucherError::Serialization(format!("invalid request id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// ActorId
// ---------------------------------------------------------------------------

/// The operator who triggered an action. `None` in log entries means the
/// system did it on its own (scheduled sweeps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor:{}", self.0)
    }
}

impl FromStr for ActorId {
    type Err = VoucherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("actor:").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| VoucherError::Serialization(format!("invalid actor id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voucher_id_uniqueness() {
        let a = VoucherId::new();
        let b = VoucherId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn voucher_id_ordering() {
        let a = VoucherId::new();
        let b = VoucherId::new();
        assert!(a < b);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn voucher_id_timestamp_extraction() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let id = VoucherId::new();
        let after = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let ts = id.timestamp_ms();
        assert!(
            ts >= before && ts <= after,
            "ts={ts}, before={before}, after={after}"
        );
    }

    #[test]
    fn request_id_parses_with_and_without_prefix() {
        let id = RequestId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("req:"));
        assert_eq!(shown.parse::<RequestId>().unwrap(), id);
        assert_eq!(id.0.to_string().parse::<RequestId>().unwrap(), id);
    }

    #[test]
    fn voucher_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<VoucherId>().unwrap_err();
        assert!(matches!(err, VoucherError::Serialization(_)));
    }
}

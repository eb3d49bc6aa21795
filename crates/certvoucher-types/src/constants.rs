//! System-wide constants for the CertVoucher engine.

/// Maximum allocation attempts before giving up on a contended pool.
pub const DEFAULT_ALLOCATION_ATTEMPTS: u32 = 5;

/// Grace period before an unused allocation is recycled (3 days).
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 3 * 24 * 60 * 60;

/// Default interval between reconciliation sweeps (daily).
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Default interval between recycling sweeps (daily).
pub const DEFAULT_RECYCLE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Delay between consecutive calls to the external authority.
pub const DEFAULT_ISSUER_CALL_DELAY_MS: u64 = 500;

/// Upper bound on a single external authority query.
pub const DEFAULT_ISSUER_TIMEOUT_SECS: u64 = 30;

/// Default page size for operator listings.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Largest page size an operator listing will honour.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Maximum length of a voucher code accepted by import.
pub const MAX_CODE_LEN: usize = 128;

/// Identity recorded when the external authority reports a use without a name.
pub const UNIDENTIFIED_OWNER: &str = "UNIDENTIFIED";

/// Domain separator for the audit log digest chain.
pub const LOG_DIGEST_DOMAIN: &[u8] = b"certvoucher:log:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "CertVoucher";

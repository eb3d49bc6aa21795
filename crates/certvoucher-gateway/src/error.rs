use certvoucher_types::VoucherError;
use thiserror::Error;

/// Failure talking to an outbound collaborator.
///
/// The engine never lets one of these abort a sweep: for the issuer they
/// become a `QueryError` outcome, for the notifier a warning.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The collaborator did not answer within the configured bound.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// HTTP client could not be built (bad CA file, TLS backend).
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    // ── Response ────────────────────────────────────────────────────
    /// Non-2xx answer.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body could not be normalized into an issuer situation.
    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    // ── Setup ───────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Returns `true` if a later attempt may succeed without any change on our side.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }
}

impl From<GatewayError> for VoucherError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MalformedPayload { reason } => Self::MalformedPayload { reason },
            GatewayError::Configuration(msg) | GatewayError::Client(msg) => {
                Self::Configuration(msg)
            }
            GatewayError::InvalidUrl(e) => Self::Configuration(e.to_string()),
            other => Self::QueryFailed {
                reason: other.to_string(),
            },
        }
    }
}

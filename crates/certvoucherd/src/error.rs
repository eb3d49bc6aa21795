use certvoucher_gateway::GatewayError;
use certvoucher_types::VoucherError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config loading failed: {0}")]
    Config(Box<figment::Error>),

    #[error(transparent)]
    Voucher(#[from] VoucherError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<figment::Error> for DaemonError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl DaemonError {
    /// Process exit code: 2 for bad input or configuration, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::Voucher(VoucherError::Configuration(_))
            | Self::Gateway(GatewayError::Configuration(_)) => 2,
            Self::Voucher(e) if e.is_business() => 2,
            _ => 1,
        }
    }
}

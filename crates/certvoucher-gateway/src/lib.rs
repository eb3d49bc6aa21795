//! # certvoucher-gateway
//!
//! Outbound collaborators of the CertVoucher engine.
//!
//! - [`IssuerClient`]: asks the external certification authority what became
//!   of a voucher code. [`HttpIssuerClient`] is the production implementation.
//! - [`normalize_payload`]: the single place that understands the authority's
//!   inconsistent response shapes.
//! - [`CompletionNotifier`]: tells the request module that a linked request
//!   finished (or lost its voucher to a conflict).
//!
//! Nothing in this crate touches voucher state. Failures surface as
//! [`GatewayError`], which the engine downgrades to per-voucher outcomes.

pub mod config;
pub mod error;
pub mod issuer;
pub mod notifier;
pub mod payload;
pub mod transport;

#[cfg(feature = "test-helpers")]
pub mod testing;

pub use config::{IssuerConfig, NotifierConfig};
pub use error::GatewayError;
pub use issuer::{HttpIssuerClient, IssuerClient};
pub use notifier::{
    CompletionNotice, CompletionNotifier, CompletionOutcome, TracingNotifier, WebhookNotifier,
    build_notifier,
};
pub use payload::normalize_payload;
pub use transport::{TlsMode, TransportConfig};

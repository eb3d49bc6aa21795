//! # certvoucher-types
//!
//! Shared types, errors, and configuration for the **CertVoucher** engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`VoucherId`], [`RequestId`], [`ActorId`]
//! - **Voucher model**: [`Voucher`], [`VoucherStatus`], [`VoucherChange`], [`Expectation`]
//! - **Audit trail**: [`VoucherLogEntry`], [`NewLogEntry`], [`LogAction`]
//! - **External authority**: [`IssuerSituation`], [`QueryStatus`]
//! - **Import / query**: [`ImportRecord`], [`ImportSummary`], [`VoucherFilter`], [`PageRequest`], [`Page`]
//! - **Configuration**: [`EngineConfig`] and its sections
//! - **Errors**: [`VoucherError`] with `VC_ERR_` prefix codes
//! - **Normalization**: [`normalize_document`], [`normalize_name`]
//! - **Constants**: system-wide limits and defaults

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod import;
pub mod log;
pub mod normalize;
pub mod query;
pub mod situation;
pub mod voucher;

// Re-export all primary types at crate root for ergonomic imports:
//   use certvoucher_types::{Voucher, VoucherStatus, VoucherError, ...};

pub use config::*;
pub use error::*;
pub use ids::*;
pub use import::*;
pub use log::*;
pub use normalize::*;
pub use query::*;
pub use situation::*;
pub use voucher::*;

// Constants are accessed via `certvoucher_types::constants::FOO`
// (not re-exported to avoid name collisions).

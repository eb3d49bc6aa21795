//! # certvoucher-engine
//!
//! **Lifecycle plane**: everything that moves a voucher between states.
//!
//! ## Architecture
//!
//! ```text
//! client request ──► AllocationEngine ──────────────┐
//!                                                   ▼
//! reconciliation loop ──► ReconciliationService ─► VoucherStore
//!                              │                    ▲
//!                              └─► ConflictResolver ┤
//! recycling loop ───────► RecyclingScheduler ───────┘
//! ```
//!
//! Every state change is a conditional transition on the store: the writer
//! states what it expects to find, and loses cleanly if someone else got
//! there first. No component holds a lock across an external call.
//!
//! ## Services
//!
//! - [`AllocationEngine`]: binds a RECYCLABLE or AVAILABLE voucher to a request
//! - [`ReconciliationService`]: polls the external authority for ALLOCATED vouchers
//! - [`ConflictResolver`]: hands a voucher to the owner the authority reports
//! - [`RecyclingScheduler`]: reclaims allocations past their grace period
//! - [`VoucherImporter`], [`InventoryAudit`], [`OperatorConsole`]: operator surface

pub mod allocation;
pub mod audit;
pub mod conflict;
pub mod import;
pub mod operator;
pub mod reconciliation;
pub mod recycling;
pub mod scheduler;
pub mod sweep_lock;

pub use allocation::{AllocationEngine, AllocationRequest};
pub use audit::{ChainVerification, InventoryAudit, InventoryReport, InventorySnapshot};
pub use conflict::{ConflictResolver, Resolution};
pub use import::VoucherImporter;
pub use operator::{OperatorConsole, VoucherDetail};
pub use reconciliation::{Classification, ReconcileReport, ReconciliationService, SyncOutcome, classify};
pub use recycling::{RecycleReport, RecyclingScheduler};
pub use scheduler::{reconciliation_loop, recycling_loop, spawn_loops};
pub use sweep_lock::{SweepGuard, SweepLock};

//! Service wiring shared by every subcommand.

use std::sync::Arc;

use certvoucher_engine::{InventoryAudit, OperatorConsole, ReconciliationService, RecyclingScheduler};
use certvoucher_gateway::{HttpIssuerClient, build_notifier};
use certvoucher_store::{SqliteVoucherStore, VoucherStore};
use tracing::debug;

use crate::config::DaemonConfig;
use crate::error::DaemonError;

pub struct App {
    pub config: DaemonConfig,
    pub reconciliation: Arc<ReconciliationService>,
    pub recycling: Arc<RecyclingScheduler>,
    pub console: OperatorConsole,
    pub audit: InventoryAudit,
}

impl App {
    pub fn build(config: DaemonConfig) -> Result<Self, DaemonError> {
        if let Some(parent) = config.database.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store: Arc<dyn VoucherStore> = Arc::new(SqliteVoucherStore::open(&config.database.path)?);
        debug!(path = %config.database.path.display(), "Voucher store opened");

        let issuer = Arc::new(HttpIssuerClient::new(config.issuer.clone())?);
        let notifier = build_notifier(&config.notifier)?;

        let reconciliation = Arc::new(ReconciliationService::new(
            Arc::clone(&store),
            issuer,
            notifier,
            config.engine.reconciliation.clone(),
        ));
        let recycling = Arc::new(RecyclingScheduler::new(
            Arc::clone(&store),
            config.engine.recycling.clone(),
        ));

        Ok(Self {
            console: OperatorConsole::new(Arc::clone(&store), Arc::clone(&reconciliation)),
            audit: InventoryAudit::new(Arc::clone(&store)),
            reconciliation,
            recycling,
            config,
        })
    }
}

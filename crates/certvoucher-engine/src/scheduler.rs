//! Periodic sweep loops.
//!
//! Each loop ticks on its own interval and exits as soon as the shared
//! [`CancellationToken`] fires. A failed sweep is logged and the loop waits
//! for the next tick. An interval of zero disables the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::reconciliation::ReconciliationService;
use crate::recycling::RecyclingScheduler;

/// Run reconciliation sweeps every `interval` until `cancel` fires.
pub async fn reconciliation_loop(
    service: Arc<ReconciliationService>,
    interval: Duration,
    cancel: CancellationToken,
) {
    if interval.is_zero() {
        info!("Reconciliation loop disabled");
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = service.sweep(&cancel).await {
                    warn!(error = %e, "periodic reconciliation failed");
                }
            }
        }
    }
}

/// Run recycling sweeps every `interval` until `cancel` fires.
///
/// The sweep itself is synchronous store work and runs on the blocking pool.
pub async fn recycling_loop(
    scheduler: Arc<RecyclingScheduler>,
    interval: Duration,
    cancel: CancellationToken,
) {
    if interval.is_zero() {
        info!("Recycling loop disabled");
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let scheduler = Arc::clone(&scheduler);
                let token = cancel.clone();
                let sweep = tokio::task::spawn_blocking(move || {
                    scheduler.sweep_at(scheduler.grace_period(), chrono::Utc::now(), &token)
                });
                match sweep.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "periodic recycling failed"),
                    Err(e) => warn!(error = %e, "recycling task panicked"),
                }
            }
        }
    }
}

/// Spawn both loops on the current runtime.
pub fn spawn_loops(
    reconciliation: Arc<ReconciliationService>,
    reconcile_every: Duration,
    recycling: Arc<RecyclingScheduler>,
    recycle_every: Duration,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(reconciliation_loop(reconciliation, reconcile_every, cancel.clone())),
        tokio::spawn(recycling_loop(recycling, recycle_every, cancel.clone())),
    ]
}

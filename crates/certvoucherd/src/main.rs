mod app;
mod cli;
mod config;
mod error;

use std::io::Write;

use certvoucher_engine::spawn_loops;
use certvoucher_types::{PageRequest, VoucherError, VoucherFilter};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Command, ListArgs};
use crate::config::{DaemonConfig, LoggingConfig};
use crate::error::DaemonError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match DaemonConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("certvoucherd: {err}");
            std::process::exit(err.exit_code());
        }
    };
    init_tracing(&config.logging);

    if let Err(err) = run(cli, config).await {
        eprintln!("certvoucherd: {err}");
        std::process::exit(err.exit_code());
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn run(cli: Cli, config: DaemonConfig) -> Result<(), DaemonError> {
    let app = App::build(config)?;
    tracing::debug!(command = ?cli.command, "dispatching command");

    match cli.command {
        Command::Run => serve(&app).await,
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)?;
            print_json(&app.console.import_json(&raw, cli.actor)?)
        }
        Command::List(args) => {
            let (filter, page) = listing(args);
            print_json(&app.console.list(&filter, page)?)
        }
        Command::Show { code } => print_json(&app.console.show(&code)?),
        Command::Sync { code } => print_json(&app.console.sync_code(&code, cli.actor).await?),
        Command::Recycle => {
            let recycling = app.recycling.clone();
            let report =
                tokio::task::spawn_blocking(move || recycling.sweep(recycling.grace_period()))
                    .await??;
            print_json(&report)
        }
        Command::Audit => {
            let report = app.audit.run()?;
            print_json(&report)?;
            if report.is_clean() {
                Ok(())
            } else {
                Err(VoucherError::Internal("inventory audit found problems".into()).into())
            }
        }
    }
}

/// Run both sweep loops until Ctrl-C.
async fn serve(app: &App) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();
    let engine = &app.config.engine;
    let handles = spawn_loops(
        app.reconciliation.clone(),
        engine.reconciliation.interval(),
        app.recycling.clone(),
        engine.recycling.interval(),
        &cancel,
    );
    info!(
        reconcile_every_secs = engine.reconciliation.interval_secs,
        recycle_every_secs = engine.recycling.interval_secs,
        grace_period_secs = engine.recycling.grace_period_secs,
        "certvoucherd running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, finishing current sweep");
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "sweep loop ended abnormally");
        }
    }
    Ok(())
}

fn listing(args: ListArgs) -> (VoucherFilter, PageRequest) {
    (
        VoucherFilter {
            status: args.status,
            code: args.code,
            client: args.client,
        },
        PageRequest::new(args.page, args.per_page),
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DaemonError> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

use std::path::PathBuf;

use certvoucher_types::{ActorId, VoucherStatus};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "certvoucherd", version, about = "Certificate voucher lifecycle daemon")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true, env = "CERTVOUCHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Operator performing the command, recorded in the audit trail
    #[arg(long, global = true)]
    pub actor: Option<ActorId>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the reconciliation and recycling loops until interrupted
    Run,
    /// Import vouchers from a JSON array of records or codes
    Import {
        file: PathBuf,
    },
    /// List vouchers
    List(ListArgs),
    /// Show one voucher and its audit trail
    Show {
        code: String,
    },
    /// Reconcile one voucher against the external authority now
    Sync {
        code: String,
    },
    /// Run one recycling sweep now
    Recycle,
    /// Check inventory invariants and the audit trail chain
    Audit,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<VoucherStatus>,
    /// Substring of the voucher code
    #[arg(long)]
    pub code: Option<String>,
    /// Substring of the client name or document
    #[arg(long)]
    pub client: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long, default_value_t = 50)]
    pub per_page: u32,
}

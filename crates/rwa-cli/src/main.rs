//! # rwa CLI Entry Point
//!
//! Assembles subcommands and dispatches to handler modules.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rwa_ledger::{HttpLedgerClient, LedgerConfig};

/// RWA operator CLI.
///
/// Inspects ledger transactions, generates signing keys, and works the
/// settlement reconciliation queue.
#[derive(Parser, Debug)]
#[command(name = "rwa", version, about)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Query transactions on the ledger gateway.
    Ledger(rwa_cli::ledger::LedgerArgs),
    /// Generate an Ed25519 key pair.
    Keygen(rwa_cli::keygen::KeygenArgs),
    /// Work the reconciliation queue or audit an account.
    #[cfg(feature = "postgres")]
    Reconcile(rwa_cli::reconcile::ReconcileArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Commands::Ledger(args) => {
            let config = LedgerConfig::from_env().context("ledger configuration")?;
            let client = HttpLedgerClient::new(config)?;
            rwa_cli::ledger::run(&args, &client, &mut stdout).await
        }
        Commands::Keygen(args) => rwa_cli::keygen::run(&args, &mut stdout),
        #[cfg(feature = "postgres")]
        Commands::Reconcile(args) => rwa_cli::reconcile::run(&args, &mut stdout).await,
    }
}

//! Callsig simulation binary.
//!
//! # Usage
//!
//! ```bash
//! # Three clients in the default namespace
//! callsig-sim
//!
//! # Larger call with a fixed seed and manual admission
//! callsig-sim --clients 6 --namespace standup --seed 7 --manual-admission
//! ```

use callsig_harness::{Admission, ScenarioConfig, run_call};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Callsig call simulation
#[derive(Parser, Debug)]
#[command(name = "callsig-sim")]
#[command(about = "Run a seeded multi-client call against a simulated signaling server")]
#[command(version)]
struct Args {
    /// Number of clients, including the caller
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Namespace every client registers in
    #[arg(short, long, default_value = "lobby")]
    namespace: String,

    /// Seed for statuses and invitation decisions
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Keep joiners pending until the caller's side admits them
    #[arg(long)]
    manual_admission: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ScenarioConfig {
        clients: args.clients,
        namespace: args.namespace,
        seed: args.seed,
        admission: if args.manual_admission { Admission::Manual } else { Admission::Open },
    };
    tracing::info!(
        clients = config.clients,
        namespace = %config.namespace,
        seed = config.seed,
        "callsig simulation starting"
    );

    let report = run_call(&config).await?;

    tracing::info!(
        room = %report.room,
        accepted = ?report.accepted,
        denied = ?report.denied,
        messages = report.messages,
        conflicts = report.conflicts,
        "call complete"
    );
    Ok(())
}

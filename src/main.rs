//! tx-relay: transaction submission and confirmation service.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                        TX RELAY                           │
//!                      │                                                           │
//!   Game server /      │  ┌─────────┐    ┌──────────────┐    ┌─────────────────┐  │
//!   relay-cli ─────────┼─▶│  http   │───▶│    claims    │───▶│   sequencer     │  │
//!                      │  │ server  │    │ (idempotency)│    │ (nonce lease)   │  │
//!                      │  └─────────┘    └──────────────┘    └────────┬────────┘  │
//!                      │                                              ▼           │
//!                      │  ┌──────────────┐    ┌──────────────┐   ┌──────────┐     │
//!   Receipt ◀──────────┼──│ confirmation │◀───│  submission  │◀──│  signer  │     │
//!                      │  │   tracker    │    │ (retry)      │   │ (wallet) │     │
//!                      │  └──────┬───────┘    └──────┬───────┘   └──────────┘     │
//!                      │         └──────── ledger (JSON-RPC) ◀───────────────────┼──── EVM node
//!                      │                                                           │
//!                      │  config · observability · resilience · lifecycle          │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use tx_relay::config::load_config;
use tx_relay::http::HttpServer;
use tx_relay::lifecycle::{signals, startup, Shutdown};
use tx_relay::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "tx-relay")]
#[command(about = "Transaction relay: submit, confirm and deduplicate on-chain operations", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tx-relay starting");
    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.api.bind_address,
        rpc_url = %config.ledger.rpc_url,
        chain_id = config.ledger.chain_id,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let pipeline = startup::build_pipeline(&config).await?;
    pipeline.ledger_healthy().await;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::listen_for_shutdown(shutdown.clone()));

    let claims = pipeline.claims().clone();
    let pruner = tokio::spawn(claims.clone().run_pruner(
        Duration::from_secs(config.claims.prune_interval_secs),
        shutdown.subscribe(),
    ));

    pipeline.resume_unfinished();

    let listener = TcpListener::bind(&config.api.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(&config.api, pipeline).run(listener, shutdown.clone()).await?;

    shutdown.trigger();
    if let Err(e) = pruner.await {
        tracing::warn!(error = %e, "Claim pruner task failed");
    }
    claims.save_to_file()?;

    tracing::info!("Shutdown complete");
    Ok(())
}

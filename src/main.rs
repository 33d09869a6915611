//! edge-gate
//!
//! A TLS edge gateway that defends its listener against connection floods.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                     EDGE GATE                         │
//!                 │                                                       │
//!   Client ──────▶│  ┌──────────┐   ┌────────────┐   ┌──────────────┐    │
//!                 │  │   net    │──▶│    TLS     │──▶│    http      │    │
//!                 │  │ listener │   │ handshake  │   │   server     │    │
//!                 │  └────┬─────┘   └─────▲──────┘   └──────────────┘    │
//!                 │       │ register      │ evict                         │
//!                 │       ▼               │                               │
//!                 │  ┌──────────────────────────────┐                     │
//!                 │  │          admission           │                     │
//!                 │  │ registry + monitor + policy  │◀── sampler          │
//!                 │  └──────────────────────────────┘                     │
//!                 │                                                       │
//!                 │  config (hot reload) · admin API · metrics · logging  │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use edge_gate::config::loader::load_config;
use edge_gate::config::GatewayConfig;
use edge_gate::lifecycle::startup;
use edge_gate::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "edge-gate")]
#[command(about = "TLS edge gateway with connection-flood admission control", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        admission_enabled = config.admission.enabled,
        "edge-gate starting"
    );

    startup::run(config, args.config).await?;
    Ok(())
}

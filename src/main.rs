//! Payment gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ net::ConnectionHandler ──▶ routing::Router
//!                 (bounded)          (decode / pipeline)         │
//!                                                                ├─ POST /payments ──▶ 200, then
//!                                                                │      payments::DispatchEngine
//!                                                                │        default ─▶ fallback ─▶ queue
//!                                                                │                               │
//!                                                                │      queue::WorkerPool ◀──────┘
//!                                                                │      queue::scheduler (spill ─▶ queue)
//!                                                                │
//!                                                                └─ GET /payments-summary ──▶ PaymentStore
//!
//!     Cross-cutting: config, observability (tracing + prometheus),
//!                    resilience (backoff / retry policy / timeouts), lifecycle, admin API
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use payment_gateway::config::load_config;
use payment_gateway::lifecycle::{spawn_signal_handler, Gateway};
use payment_gateway::net::Listener;
use payment_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "payment-gateway")]
#[command(about = "Payment gateway with processor failover", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    logging::init_logging(&config.observability)?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if config.runtime.worker_threads > 0 {
        runtime.worker_threads(config.runtime.worker_threads);
    }
    runtime.build()?.block_on(async move {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            bind_address = %config.listener.bind_address,
            default_url = %config.processors.default_url,
            fallback_url = %config.processors.fallback_url,
            "payment-gateway starting"
        );

        if config.observability.metrics_enabled {
            let addr: SocketAddr = config.observability.metrics_address.parse()?;
            metrics::init_metrics(addr)?;
        }

        let listener_config = config.listener.clone();
        let gateway = Gateway::build(config).await?;
        let listener = Listener::bind(&listener_config).await?;
        spawn_signal_handler(gateway.shutdown_handle());

        let report = gateway.run(listener).await?;
        tracing::info!(
            drained = report.dispatched,
            abandoned = report.abandoned,
            "payment-gateway stopped"
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

//! TEE-rooted randomness oracle.
//!
//! Off-chain service that watches the VRF coordinator contract for
//! randomness requests and fulfills them with a deterministic, signed random
//! value. Runs three concurrent subsystems:
//!
//! - **Monitor** — WebSocket subscription to `RequestQueued` events with
//!   resume-from-block backfill and per-request dedup.
//! - **Fulfiller** — generates, attests, and submits fulfillments with
//!   bounded retry.
//! - **HTTP server** — identity exchange for the external registrar
//!   (`/current-address`, `/current-pubkey`, `/rotate-key`) plus liveness
//!   and status probes.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod coordinator;
mod error;
mod fulfiller;
mod identity;
mod keys;
mod metrics;
mod monitor;
mod submitter;
mod vrf;

use config::AppConfig;
use coordinator::CoordinatorClient;
use identity::AppState;
use keys::RootKeySource;
use metrics::Metrics;
use monitor::RequestMonitor;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ethers_providers=warn,hyper=warn,reqwest=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    info!(
        contract = %format!("{:#x}", config.contract_address),
        rpc = %config.rpc_url,
        ws = %config.ws_url,
        "Starting randomness oracle"
    );

    // Bootstrap failure is fatal: without an attested secret there is no
    // oracle identity to register.
    let keys = Arc::new(
        RootKeySource::bootstrap(&config)
            .await
            .context("root key bootstrap failed")?,
    );
    {
        let view = keys
            .current_view()
            .await
            .context("initial key view unavailable")?;
        info!(
            address = %format!("{:#x}", view.address()),
            generation = view.generation(),
            "Oracle identity ready, awaiting registrar"
        );
    }

    let coordinator = Arc::new(CoordinatorClient::new(&config).context("invalid RPC endpoint")?);
    let metrics = Arc::new(Metrics::new());
    let pending_count = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel(256);

    // Background: stream ledger events into the fulfillment pipeline.
    let monitor = RequestMonitor::new(config.clone(), tx, metrics.clone());
    tokio::spawn(monitor.run());

    // Background: consume events and submit fulfillment transactions.
    let fulfiller_config = config.clone();
    let fulfiller_keys = keys.clone();
    let fulfiller_pending = pending_count.clone();
    let fulfiller_metrics = metrics.clone();
    tokio::spawn(async move {
        fulfiller::run_fulfiller(
            fulfiller_config,
            fulfiller_keys,
            coordinator,
            rx,
            fulfiller_pending,
            fulfiller_metrics,
        )
        .await;
    });

    let state = web::Data::new(AppState {
        keys,
        pending_count,
        metrics,
    });

    info!(port = config.http_port, "Starting identity HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(identity::routes)
    })
    .bind(("0.0.0.0", config.http_port))?
    .run()
    .await?;

    Ok(())
}

//! x402 Solana facilitator HTTP entrypoint.
//!
//! Launches an Axum-based HTTP server exposing the x402 facilitator
//! interface for payment verification and settlement on Solana.
//!
//! Endpoints (under `/v1/x402`):
//! - `GET /supported` – supported payment kinds (scheme/network)
//! - `POST /requirements` – build payment requirements from a USD price
//! - `POST /verify` – verify a payment header against requirements
//! - `POST /settle` – co-sign and submit an accepted payment on-chain
//! - `GET /fee-payer` – the facilitator's fee-payer address
//! - `GET /demo/protected` – demo resource behind a 402 challenge
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the bind address
//! - `FACILITATOR_PRIVATE_KEY` enables the payment endpoints
//! - `LOG_LEVEL` (or `RUST_LOG`) controls tracing output

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use tokio::signal::unix::{SignalKind, signal};
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use x402_solana::config::Config;
use x402_solana::facilitator::SolanaFacilitator;
use x402_solana::handlers::{self, AppState};
use x402_solana::rpc::RpcClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level())),
        )
        .init();

    // A malformed key is fatal; an absent key degrades to discovery-only.
    let facilitator = match config.keypair()? {
        Some(keypair) => {
            let rpc = RpcClient::new(config.rpc_url().clone())?;
            let facilitator = SolanaFacilitator::new(keypair, rpc, &config);
            tracing::info!(
                fee_payer = %facilitator.fee_payer(),
                network = %facilitator.network(),
                rpc = %config.rpc_url(),
                "Facilitator initialized"
            );
            Some(Arc::new(facilitator))
        }
        None => {
            tracing::warn!("No facilitator private key configured - payment endpoints unavailable");
            None
        }
    };

    let state = AppState {
        facilitator,
        network: config.network(),
    };

    let http_endpoints = Router::new()
        .merge(handlers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    // Drain in-flight settlements on SIGTERM or SIGINT before exiting.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let axum_graceful_shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::info!("Shutdown signal received");
    };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}

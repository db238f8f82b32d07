//! # ineedit-server
//!
//! HTTP front end for the ineedit marketplace.
//!
//! This binary provides:
//! - **REST API** (axum) over the settlement core: listings, offers,
//!   orders, refunds and conversations
//! - **Expiry sweeper** that closes overdue offers and returns held funds
//! - **Search projection** of listing availability into Meilisearch

mod api;
mod config;
mod error;
mod projector;
mod sweeper;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use ineedit_market::Market;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::projector::MeiliProjector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,ineedit_server=debug,ineedit_market=debug")
        }))
        .init();

    info!("Starting ineedit server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Build the market
    // -----------------------------------------------------------------------
    let mut market = Market::new(config.database_path.clone()).with_policy(config.policy.clone());
    match config.meili.clone() {
        Some(meili) => {
            info!(url = %meili.url, index = %meili.index, "Projecting listings to Meilisearch");
            market = market.with_projector(Arc::new(MeiliProjector::spawn(meili)));
        }
        None => info!("MEILI_URL not set, search projection disabled"),
    }

    // Run migrations before accepting traffic.
    market.open()?;
    info!(path = %config.database_path.display(), "Database ready");

    let market = Arc::new(market);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    sweeper::spawn_sweeper(market.clone(), config.sweep_interval);

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(AppState { market }, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

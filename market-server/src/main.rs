//! market-server — marketplace order and payment engine
//!
//! Long-running service that:
//! - Creates multi-item orders atomically against live inventory
//! - Splits every item line into commission and seller payout
//! - Drives the order and item lifecycles
//! - Handles the Stripe payment flow and signed webhooks
//! - Expires unpaid orders in the background, restoring stock

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use market_server::orders::sweeper::ExpirationSweeper;
use market_server::{api, AppState, Config};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting market-server (env: {})", config.environment);

    let state = AppState::new(&config).await?;

    // Background sweep of unpaid orders past their payment window
    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(ExpirationSweeper::new(
        state.pool.clone(),
        config.sweep_interval_secs,
        shutdown.clone(),
    ));
    let sweeper_handle = tokio::spawn({
        let sweeper = Arc::clone(&sweeper);
        async move { sweeper.run().await }
    });

    let app = api::create_router(state);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("market-server HTTP listening on {http_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    let _ = sweeper_handle.await;
    Ok(())
}

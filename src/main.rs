//! Tirestore - backend for a tire e-commerce storefront

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tirestore::{
    api::{self, AppState},
    cache::create_cache,
    config::Config,
    db,
    services::{create_mailer, create_storage, StripeGateway},
};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tirestore=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tirestore v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");
    if config.stripe.secret_key.is_empty() {
        tracing::warn!("Stripe secret key is not set; checkout will fail");
    }
    if config.stripe.webhook_secret.is_empty() {
        tracing::warn!("Stripe webhook secret is not set; webhooks will be rejected");
    }

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected");

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized: {}", cache.driver_name());

    // External systems
    let gateway = Arc::new(
        StripeGateway::new(&config.stripe).context("Failed to create Stripe client")?,
    );
    let mailer = create_mailer(&config.email)?;
    let storage = create_storage(&config.storage).await?;
    tracing::info!("Storage initialized: {:?}", config.storage.driver);

    // Build application state
    let state = AppState::new(&config, pool.clone(), cache, gateway, mailer, storage);
    let app = api::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler, never resolve
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

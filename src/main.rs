//! Storefront Fulfillment Server - Main Application Entry Point
//!
//! REST API over the order fulfillment and balance ledger core. Callers are
//! authenticated by the gateway in front of this service, which forwards
//! the acting user in `X-Actor-Id` / `X-Actor-Name` headers.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries, explicit transactions)
//! - **Notifications**: signed webhooks, or the log when none is configured
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Wire store, fulfillment service and notifier
//! 5. Start server on configured port

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use storefront_fulfillment_server::{
    AppState,
    config::Config,
    db,
    services::{
        fulfillment::FulfillmentService,
        notifier::build_notifier,
    },
    store::postgres::PgStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        isolation = ?config.isolation_level,
        allow_overdraft = config.allow_overdraft,
        "Configuration loaded"
    );

    // Pool acquisition shares the lock budget so a starved pool surfaces as contention
    let pool = db::create_pool(
        &config.database_url,
        config.db_max_connections,
        config.lock_timeout(),
    )
    .await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = PgStore::new(pool, config.isolation_level, config.lock_timeout());

    // A webhook URL without a secret fails startup
    let notifier = build_notifier(
        config.notify_webhook_url.as_deref(),
        config.notify_webhook_secret.as_deref(),
    )?;

    let service =
        FulfillmentService::new(Arc::new(store), config.ledger_policy()).with_notifier(notifier);
    let app = storefront_fulfillment_server::router(AppState::new(service, config.retry_policy()));

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! StayFinder Backend Server
//!
//! REST API for booking listings and paying for them through hosted
//! checkout.

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use stayfinder_server::booking::BookingService;
use stayfinder_server::config::Config;
use stayfinder_server::middleware::auth::AuthService;
use stayfinder_server::payment::{PaymentService, PaymentSettings};
use stayfinder_server::state::AppState;
use stayfinder_server::store::{PgStore, Store};
use stayfinder_server::stripe::StripeClient;
use stayfinder_server::{routes, sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stayfinder_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Initialize database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!()
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;

    tracing::info!("Database connected successfully");

    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhook deliveries will be rejected");
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let stripe = Arc::new(StripeClient::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
    ));

    let booking_service = Arc::new(BookingService::new(store.clone()));
    let payment_service = Arc::new(PaymentService::new(
        store,
        stripe,
        PaymentSettings {
            client_url: config.client_url.clone(),
            currency: config.payment_currency.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
        },
    ));
    let auth_service = Arc::new(AuthService::new(&config.jwt_secret));

    // Keep the scheduler handle alive for the life of the server
    let _sweeper = sweeper::start(payment_service.clone())
        .await
        .context("Failed to start session sweeper")?;

    let app_state = AppState::new(booking_service, payment_service, auth_service);

    let app = routes::app(app_state).layer(configure_cors(&config)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

fn configure_cors(config: &Config) -> anyhow::Result<CorsLayer> {
    if config.cors_allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return Ok(CorsLayer::permissive());
    }

    let origins = config
        .cors_allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {origin}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Credentials are needed for the session cookie, which rules out wildcards
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

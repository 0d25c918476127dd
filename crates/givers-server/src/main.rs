//! GIVErS HTTP Server
//!
//! Axum server exposing the donation API: checkout, provider webhooks, donor
//! self-service, project charts and messages, and the activity feed.

mod auth;
mod config;
mod error;
mod extract;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use givers_donations::DonationService;
use givers_payments::{PaymentsGateway, StripeClient};
use givers_store::{create_pool, mask_database_url, run_migrations, MemoryStore, PgStore};

use crate::auth::SessionKeys;
use crate::config::Config;
use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn cors_layer(frontend_url: &str) -> CorsLayer {
    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        Err(_) => {
            tracing::warn!(frontend_url, "FRONTEND_URL is not a valid origin; allowing any");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    // Payments
    let stripe = StripeClient::new(config.payments.clone())?;
    if stripe.is_configured() {
        tracing::info!(
            fee_percent = config.payments.platform_fee_percent,
            "Payments configured"
        );
        if config.payments.webhook_secret.is_empty() {
            tracing::warn!("PAYMENTS_WEBHOOK_SECRET is empty; webhooks will be refused");
        }
    } else {
        tracing::warn!("PAYMENTS_SECRET_KEY is empty; donation endpoints will answer 503");
    }
    let gateway: Arc<dyn PaymentsGateway> = Arc::new(stripe);

    // Storage
    let (donations, storage) = match &config.database_url {
        Some(url) => {
            tracing::info!(database = %mask_database_url(url), "Using PostgreSQL");
            let applied = run_migrations(url).await?;
            tracing::info!(applied, "Database migrations up to date");
            let pool = create_pool(url, config.database_max_connections).await?;
            let store = Arc::new(PgStore::new(pool));
            (
                DonationService::with_store(gateway, store, config.frontend_url.clone()),
                "postgres",
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            let store = Arc::new(MemoryStore::new());
            (
                DonationService::with_store(gateway, store, config.frontend_url.clone()),
                "memory",
            )
        }
    };

    if config.session_secret.is_empty() {
        tracing::warn!("SESSION_SECRET is empty; every signed-in endpoint will answer 401");
    }

    let state = AppState {
        donations: Arc::new(donations),
        sessions: Arc::new(SessionKeys::new(&config.session_secret)),
        storage,
        connect_redirect_uri: Arc::from(config.connect_redirect_uri()),
    };

    let app = routes::router(state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors_layer(&config.frontend_url))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, storage, "GIVErS server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

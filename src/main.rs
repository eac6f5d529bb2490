use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;

use pitchside::config::Config;
use pitchside::db::{create_pool, init_db, queries, AppState};
use pitchside::handlers;
use pitchside::livescore::LiveScoreCache;
use pitchside::models::{CreateProduct, CreateUser, CreateVariation};
use pitchside::payments::StripeConfig;
use pitchside::rate_limit;

#[derive(Parser, Debug)]
#[command(name = "pitchside")]
#[command(about = "Commerce and subscription backend for the Pitchside marketplace")]
struct Cli {
    /// Seed the database with dev data (admin, user, products)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing.
/// Creates an admin, a regular user, and a couple of shop products.
/// Only runs in dev mode and when the database is empty.
fn seed_dev_data(state: &AppState) {
    let mut conn = state
        .db
        .get()
        .expect("Failed to get db connection for seeding");

    let existing = queries::list_users(&conn).expect("Failed to list users");
    if !existing.is_empty() {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let admin = queries::create_user(
        &conn,
        &CreateUser {
            email: "admin@pitchside.local".to_string(),
            name: "Dev Admin".to_string(),
            is_admin: true,
        },
    )
    .expect("Failed to create dev admin");

    let user = queries::create_user(
        &conn,
        &CreateUser {
            email: "fan@pitchside.local".to_string(),
            name: "Dev Fan".to_string(),
            is_admin: false,
        },
    )
    .expect("Failed to create dev user");

    queries::create_product(
        &mut conn,
        &CreateProduct {
            name: "Home Shirt 2026".to_string(),
            description: Some("Replica home shirt".to_string()),
            price_cents: 5_999,
            currency: "eur".to_string(),
            stock: 50,
            image_url: None,
            variations: vec![
                CreateVariation {
                    attribute: "size:M".to_string(),
                    stock: 20,
                },
                CreateVariation {
                    attribute: "size:L".to_string(),
                    stock: 30,
                },
            ],
        },
    )
    .expect("Failed to create dev product");

    queries::create_product(
        &mut conn,
        &CreateProduct {
            name: "Club Scarf".to_string(),
            description: None,
            price_cents: 1_499,
            currency: "eur".to_string(),
            stock: 200,
            image_url: None,
            variations: vec![],
        },
    )
    .expect("Failed to create dev product");

    tracing::info!("Admin token: {}", admin.session_token);
    tracing::info!("User token:  {}", user.session_token);
    tracing::info!("============================================");
    tracing::info!("SAVE THESE TOKENS - THEY WILL NOT BE SHOWN AGAIN");
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pitchside=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let stripe = match (&config.stripe_secret_key, &config.stripe_webhook_secret) {
        (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig {
            secret_key: secret_key.clone(),
            webhook_secret: webhook_secret.clone(),
        }),
        _ => {
            tracing::warn!("Stripe not configured; checkout and webhook routes are inert");
            None
        }
    };

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        success_page_url: config.success_page_url.clone(),
        stripe,
        livescore: Arc::new(LiveScoreCache::new(
            config.livescore_api_url.clone(),
            config.livescore_api_key.clone(),
        )),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set PITCHSIDE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // Build the application router. Checkout calls out to Stripe, so it sits
    // behind the strict rate-limit tier; the cached scores route is relaxed.
    let app = Router::new()
        .merge(
            handlers::health_router()
                .layer(rate_limit::relaxed_layer(config.rate_limit.relaxed_rpm)),
        )
        .merge(
            handlers::checkout::router(state.clone())
                .layer(rate_limit::strict_layer(config.rate_limit.strict_rpm)),
        )
        .merge(
            handlers::subscriptions::router(state.clone())
                .layer(rate_limit::standard_layer(config.rate_limit.standard_rpm)),
        )
        .merge(
            handlers::orders::router(state.clone())
                .layer(rate_limit::standard_layer(config.rate_limit.standard_rpm)),
        )
        .merge(
            handlers::livescores::router()
                .layer(rate_limit::relaxed_layer(config.rate_limit.relaxed_rpm)),
        )
        // Webhooks authenticate by signature; no IP rate limit so Stripe's
        // delivery bursts are never throttled.
        .merge(handlers::webhooks::router())
        .merge(handlers::admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Pitchside server listening on {}", addr);

    // Use into_make_service_with_connect_info to enable IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tintuc::auth::TokenVerifier;
use tintuc::config::Config;
use tintuc::db::Database;
use tintuc::ingest::Ingestor;
use tintuc::routes::{self, AppState};
use tintuc::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tintuc=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("FEEDS_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:tintuc.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);
    let ingestor = Arc::new(Ingestor::from_config(db.clone(), &config)?);

    let mut scheduler = Scheduler::from_config(ingestor.clone(), &config)?;
    scheduler.start(config.run_on_start);

    let auth = TokenVerifier::from_env();
    if auth.is_none() {
        warn!("JWT_SECRET is not set, article writes are disabled");
    }

    let state = Arc::new(AppState {
        db: db.clone(),
        ingestor,
        auth,
    });

    let cors_origin = std::env::var("CORS_ORIGIN")
        .unwrap_or_else(|_| "http://localhost:5173".to_string());
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<HeaderValue>()?)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

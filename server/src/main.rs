//! Tether Server binary.

use tether_server::{backend::Backend, build_router, config::Config, db, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let catalog = config.load_catalog()?;
    let schema_version = catalog.current_version;

    tracing::info!("Starting Tether Server on {}:{}", config.host, config.port);

    let backend = match &config.database_url {
        Some(url) => Backend::postgres(db::connect(url).await?, catalog),
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory");
            Backend::memory(catalog)
        }
    };
    tracing::info!(backend = backend.name(), schema_version, "backend ready");

    let app = build_router(AppState::new(backend, schema_version));

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

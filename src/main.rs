use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nextera::{AppState, Config, router::build_router, storage::FileStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("✅ Configuration loaded successfully");

    let storage = Arc::new(FileStorage::open(&config.storage_dir)?);
    let addr = config.bind_addr;

    let state = AppState::new(config, storage)?;
    state.start();
    tracing::info!("✅ Session services started");

    let app = build_router(state.clone())?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 App shell listening on http://{}", addr);

    let supervisor = state.supervisor.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            supervisor.teardown();
            tracing::info!("👋 Shutting down");
        })
        .await?;

    Ok(())
}

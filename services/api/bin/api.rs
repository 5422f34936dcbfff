//! Main Entrypoint for the AI Lab API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the durable session store.
//! 3. Building the Gemini tutor gateway and the lab controller.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use ailab_api::{config::Config, router::create_router, state::AppState};
use ailab_core::{
    LabController,
    gateway::GeminiGateway,
    storage::{FileStore, SessionStore},
};
use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; shutting down");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Open Storage ---
    let file_store = FileStore::open(&config.storage_path).with_context(|| {
        format!(
            "Failed to open storage at {}",
            config.storage_path.display()
        )
    })?;
    info!(path = %file_store.path().display(), "Session storage ready.");
    let store = SessionStore::new(Arc::new(file_store));

    // --- 4. Initialize the Lab ---
    let gateway = Arc::new(GeminiGateway::new(config.gemini.clone()));
    let controller = Arc::new(LabController::new(
        gateway,
        store,
        config.gemini_api_key.clone(),
    ));
    if let Err(e) = controller.start().await {
        warn!(error = %e, "Lab started without a greeting");
    }

    let app_state = Arc::new(AppState { controller });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.gemini.model,
        tts_model = %config.gemini.tts_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}

//! Axum API server binary.

use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toon_api::{create_router, ApiConfig, AppState};
use toon_engine::{EngineConfig, StreamEngine};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("toon=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting toon-api");

    let config = ApiConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        stream_mode = ?config.stream.stream_mode,
        lipsync_mode = ?config.stream.lipsync_mode,
        "API config loaded"
    );

    // Bound the composite worker pool before any transform runs.
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.composite_threads)
        .build_global()
    {
        error!(error = %e, "Composite pool init failed, using defaults");
    }

    let engine = match StreamEngine::start(EngineConfig {
        manifest_path: config.manifest_path.clone(),
        layers_dir: config.layers_dir.clone(),
        limits_path: config.limits_path.clone(),
        stream: config.stream.clone(),
        encoder: config.encoder.clone(),
    })
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start stream engine");
            std::process::exit(1);
        }
    };

    let state = AppState::new(config.clone(), engine);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid bind address");

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}

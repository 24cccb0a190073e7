//! Hikma Sync Server
//!
//! Merges learning progress pushed by devices and serves the merged view back.
//!
//! # Configuration
//!
//! Environment variables:
//! - `HIKMA_SERVER_PORT`: Port to listen on (default: 8080)
//! - `HIKMA_SERVER_DATA_DIR`: Directory for the progress database (default: ~/.local/share/hikma-server)
//! - `HIKMA_SERVER_CONFIG`: Path to the key file (default: ~/.config/hikma-server/config.yaml)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /progress`: Merged progress for the caller's family
//! - `POST /progress/sync`: Merge a pushed progress slice

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hikma_offline::server::{router, ApiKeyStore, SyncServer};

/// Server configuration
#[derive(Debug, Clone)]
struct ServerConfig {
    port: u16,
    data_dir: PathBuf,
    config_path: PathBuf,
}

impl ServerConfig {
    fn from_env() -> Self {
        let port = std::env::var("HIKMA_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("HIKMA_SERVER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("hikma-server")
            });

        let config_path = std::env::var("HIKMA_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("hikma-server")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir,
            config_path,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hikma_server=info,hikma_offline=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let keys = ApiKeyStore::load(&config.config_path);

    let server = match SyncServer::open(&config.data_dir).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to open progress store: {}", e);
            std::process::exit(1);
        }
    };

    let app = router(server, Arc::new(keys));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

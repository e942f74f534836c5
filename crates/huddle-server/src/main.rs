//! # huddle-server
//!
//! Chat backend for Huddle.
//!
//! This binary provides:
//! - **REST API** (axum) for groups, group messages, direct messages, read
//!   receipts and unseen counts
//! - **WebSocket fan-out** pushing new messages and groups to connected users
//! - **Image storage** for inline uploads, served back under `/blobs`

mod api;
mod auth;
mod blob_store;
mod config;
mod error;
mod fanout;
mod session;
mod store;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_shared::constants::APP_NAME;
use huddle_store::Database;

use crate::api::AppState;
use crate::auth::TrustedGatewayIdentity;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::fanout::ConnectionRegistry;
use crate::session::ChatService;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,huddle_server=debug,huddle_store=info")
        }))
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let store = match db.path() {
        Some(path) if config.db_readers > 0 => {
            info!(path = %path.display(), readers = config.db_readers, "Database ready");
            Store::with_readers(db, &path, config.db_readers)?
        }
        _ => Store::new(db),
    };

    // Blob store (creates directory if missing)
    let blob_store = Arc::new(
        BlobStore::new(
            config.blob_storage_path.clone(),
            config.max_blob_size,
            config.public_base_url.clone(),
        )
        .await?,
    );

    let registry = ConnectionRegistry::new();
    let chat = ChatService::new(store, blob_store.clone(), registry.clone());

    let app_state = AppState {
        chat,
        blob_store,
        registry,
        identity: Arc::new(TrustedGatewayIdentity),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use huddle_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: none, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Read-only connections opened next to the writer for listing and
    /// history queries. Zero sends every query through the writer.
    /// Env: `DB_READERS`
    /// Default: `4`
    pub db_readers: usize,

    /// Filesystem path where uploaded images are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./blobs`
    pub blob_storage_path: PathBuf,

    /// Externally reachable base URL, used to build the URLs returned for
    /// uploaded images.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Maximum decoded size of an uploaded image in bytes.
    /// Env: `MAX_BLOB_SIZE`
    /// Default: 10 MiB
    pub max_blob_size: usize,

    /// Origin allowed by CORS. `None` allows any origin.
    /// Env: `CORS_ORIGIN`
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            db_readers: 4,
            blob_storage_path: PathBuf::from("./blobs"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            max_blob_size: 10 * 1024 * 1024, // 10 MiB
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = get("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(val) = get("DB_READERS") {
            match val.parse::<usize>() {
                Ok(n) => config.db_readers = n,
                Err(_) => tracing::warn!(value = %val, "Invalid DB_READERS, using default"),
            }
        }

        if let Some(path) = get("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(url) = get("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = get("MAX_BLOB_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_blob_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BLOB_SIZE, using default"),
            }
        }

        if let Some(origin) = get("CORS_ORIGIN").filter(|o| !o.is_empty() && o != "*") {
            config.cors_origin = Some(origin);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Largest request body accepted: a base64 payload of a maximum-size
    /// image plus room for the surrounding JSON.
    pub fn max_body_size(&self) -> usize {
        self.max_blob_size / 3 * 4 + 64 * 1024
    }
}

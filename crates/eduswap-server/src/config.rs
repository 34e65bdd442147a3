//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Explicit path to the SQLite database file.  When unset the store
    /// picks the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Filesystem path where chat file attachments are stored.
    /// Env: `FILE_STORAGE_PATH`
    /// Default: `./files`
    pub file_storage_path: PathBuf,

    /// Maximum attachment size in bytes (20 MiB).
    pub max_file_size: usize,

    /// Bound on any single storage round-trip before it fails fast with a
    /// storage-unavailable error.
    /// Env: `STORAGE_TIMEOUT_MS`
    /// Default: 5000
    pub storage_timeout: Duration,

    /// Base URL of the OpenAI-compatible completion endpoint.
    /// Env: `AI_ENDPOINT`
    /// Default: `https://models.inference.ai.azure.com`
    pub ai_endpoint: String,

    /// API token for the AI provider.  When unset the tutor bot is disabled
    /// and chats degrade to no reply.
    /// Env: `EDUSWAP_AI_TOKEN`
    pub ai_token: Option<String>,

    /// Model name sent to the AI provider.
    /// Env: `AI_MODEL`
    /// Default: `gpt-4o`
    pub ai_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: None,
            file_storage_path: PathBuf::from("./files"),
            max_file_size: 20 * 1024 * 1024, // 20 MiB
            storage_timeout: Duration::from_millis(5000),
            ai_endpoint: "https://models.inference.ai.azure.com".to_string(),
            ai_token: None,
            ai_model: "gpt-4o".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("FILE_STORAGE_PATH") {
            config.file_storage_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("STORAGE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.storage_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(endpoint) = std::env::var("AI_ENDPOINT") {
            config.ai_endpoint = endpoint;
        }

        if let Ok(token) = std::env::var("EDUSWAP_AI_TOKEN") {
            if !token.is_empty() {
                config.ai_token = Some(token);
            }
        }

        if let Ok(model) = std::env::var("AI_MODEL") {
            config.ai_model = model;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.storage_timeout, Duration::from_millis(5000));
        assert!(config.ai_token.is_none());
    }
}

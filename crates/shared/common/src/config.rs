//! Shared configuration structures.

use std::env;

use serde::{Deserialize, Serialize};

/// Default MongoDB connection URI (for development)
pub const DEFAULT_DATABASE_URI: &str = "mongodb://localhost:27017";

/// Default database name
pub const DEFAULT_DATABASE_NAME: &str = "content_platform";

/// Store client configuration.
///
/// Timeouts and pool sizing belong to the driver; the services pass them
/// through and never enforce their own.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub uri: String,
    pub name: String,
    pub app_name: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_DATABASE_URI.to_string(),
            name: DEFAULT_DATABASE_NAME.to_string(),
            app_name: None,
            max_connections: 10,
            min_connections: 1,
            connect_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file when present; unset or unparsable values fall
    /// back to the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            uri: env::var("MONGODB_URI").unwrap_or(defaults.uri),
            name: env::var("MONGODB_DATABASE").unwrap_or(defaults.name),
            app_name: env::var("MONGODB_APP_NAME").ok(),
            max_connections: env::var("MONGODB_MAX_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            min_connections: env::var("MONGODB_MIN_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_connections),
            connect_timeout_ms: env::var("MONGODB_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connect_timeout_ms),
        }
    }
}

//! Configuration for the stashd S3 server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// SQLite metadata database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for object bodies
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Default region reported for new buckets
    #[serde(default = "default_region")]
    pub region: String,

    /// Admin API username
    #[serde(default)]
    pub admin_username: Option<String>,

    /// Admin API password (hashed at startup, never kept in plain form)
    #[serde(default)]
    pub admin_password: Option<String>,

    /// Secret used to sign admin tokens
    #[serde(default)]
    pub token_secret: Option<String>,

    /// Comma-separated list of allowed CORS origins; empty = permissive
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Host advertised in presigned URLs generated by the admin link
    /// endpoint (e.g. `s3.example.com:3000`). Falls back to host:port.
    #[serde(default)]
    pub public_host: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./stashd.db")
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            db_path: default_db_path(),
            storage_path: default_storage_path(),
            region: default_region(),
            admin_username: None,
            admin_password: None,
            token_secret: None,
            cors_origins: Vec::new(),
            public_host: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse() {
                config.port = parsed;
            }
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }

        if let Ok(region) = std::env::var("S3_REGION") {
            config.region = region;
        }

        config.admin_username = std::env::var("ADMIN_USERNAME").ok();
        config.admin_password = std::env::var("ADMIN_PASSWORD").ok();
        config.token_secret = std::env::var("JWT_SECRET").ok();

        if let Ok(origins) = std::env::var("CORS_ORIGIN") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.public_host = std::env::var("S3_PUBLIC_HOST").ok();

        config
    }

    /// The socket address to bind.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Parse(format!("invalid HOST/PORT: {}", e)))
    }

    /// Whether the admin API is enabled (all three admin vars present).
    pub fn admin_enabled(&self) -> bool {
        self.admin_username.is_some()
            && self.admin_password.is_some()
            && self.token_secret.is_some()
    }

    /// Host used when building presigned URLs.
    pub fn advertised_host(&self) -> String {
        self.public_host
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

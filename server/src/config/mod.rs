use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::auth_token::TokenLifetimes;
use crate::error::{AuthServerError, Result};

const MIN_SECRET_LEN: usize = 32;

/// Process configuration, loaded once in `main` and handed to constructors.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub server: HttpConfig,
    pub tokens: TokenConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub users: UsersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_grace_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    #[serde(default = "default_auth_code_ttl")]
    pub auth_code_ttl_secs: u64,
}

fn default_access_ttl() -> u64 {
    15 * 60
}

fn default_refresh_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_auth_code_ttl() -> u64 {
    5 * 60
}

impl TokenConfig {
    pub fn lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            access: Duration::from_secs(self.access_ttl_secs),
            refresh: Duration::from_secs(self.refresh_ttl_secs),
            authorization_code: Duration::from_secs(self.auth_code_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub pool_size: usize,
    pub timeout_ms: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            timeout_ms: 2_000,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsersBackend {
    Memory,
    Mongodb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    pub backend: UsersBackend,
    pub mongodb_uri: String,
    pub database: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            backend: UsersBackend::Memory,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            database: "messaging".to_string(),
        }
    }
}

impl AuthConfig {
    /// Reads the TOML file, applies environment overrides and validates.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AuthServerError::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            AuthServerError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Secrets and deployment endpoints may come from the environment so they
    /// stay out of the checked-in file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.tokens.secret = secret;
        }
        if let Ok(key) = std::env::var("API_KEY_PUBLIC") {
            self.api.public_key = key;
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            self.users.mongodb_uri = uri;
        }
        if let Ok(name) = std::env::var("DATABASE_NAME") {
            self.users.database = name;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens.secret.len() < MIN_SECRET_LEN {
            return Err(AuthServerError::Config(format!(
                "tokens.secret must be at least {} bytes (set JWT_SECRET)",
                MIN_SECRET_LEN
            )));
        }
        if self.api.public_key.is_empty() {
            return Err(AuthServerError::Config(
                "api.public_key must be set (set API_KEY_PUBLIC)".to_string(),
            ));
        }
        if self.tokens.access_ttl_secs == 0
            || self.tokens.refresh_ttl_secs == 0
            || self.tokens.auth_code_ttl_secs == 0
        {
            return Err(AuthServerError::Config(
                "token lifetimes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }
}

// ABOUTME: Parses exporter configuration files and environment overrides
// ABOUTME: Converts TOML format into AppConfig with database, storage and server sections

use crate::utils;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub schema: String,
}

// Hand-written so the password never reaches logs.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &utils::redact_password(&self.url))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("schema", &self.schema)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path))?;
        let mut config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse TOML config at {}", path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `EXPORTER_*` overrides from the given lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EXPORTER_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(user) = lookup("EXPORTER_DATABASE_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = lookup("EXPORTER_DATABASE_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(schema) = lookup("EXPORTER_DATABASE_SCHEMA") {
            self.database.schema = schema;
        }
        if let Some(bucket) = lookup("EXPORTER_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(region) = lookup("EXPORTER_REGION") {
            self.storage.region = Some(region);
        }
        if let Some(listen) = lookup("EXPORTER_LISTEN") {
            self.server.listen = listen;
        }
    }

    pub fn validate(&self) -> Result<()> {
        utils::validate_connection_string(&self.database.url)
            .context("Invalid [database] url in configuration")?;
        if self.database.schema.trim().is_empty() {
            bail!("Configuration [database] schema cannot be empty");
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Signing commands need a bucket; exports do not.
    pub fn require_bucket(&self) -> Result<&str> {
        if self.bucket.trim().is_empty() {
            bail!(
                "Configuration [storage] bucket is required to issue upload URLs \
                 (set it in the config file or via EXPORTER_BUCKET)"
            );
        }
        Ok(&self.bucket)
    }
}

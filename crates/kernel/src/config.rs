//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Root directory of uploaded media (default: ./media).
    pub media_dir: PathBuf,

    /// Public URL prefix of uploaded media (default: /media).
    pub media_url: String,

    /// Days of audit log to keep on cleanup (default: 90).
    pub audit_retention_days: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key-value source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let media_dir = var("MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./media"));

        let media_url = var("MEDIA_URL").unwrap_or_else(|| "/media".to_string());

        let audit_retention_days = var("AUDIT_RETENTION_DAYS")
            .unwrap_or_else(|| "90".to_string())
            .parse()
            .context("AUDIT_RETENTION_DAYS must be a valid number of days")?;

        Ok(Self {
            database_url,
            database_max_connections,
            media_dir,
            media_url,
            audit_retention_days,
        })
    }
}

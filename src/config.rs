use crate::core::db::driver::ConnectParams;
use crate::core::db::sqlite::SqliteOptions;
use crate::core::{DbError, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DbConfig,
    #[serde(default)]
    pub sqlite: SqliteOptions,
}

/// Whether synchronous queries get their own connection or borrow one from
/// the async pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPath {
    /// One extra connection reserved for synchronous calls.
    #[default]
    Dedicated,
    /// Synchronous calls wait for a connection from the async pool.
    Shared,
}

/// Connection settings handed to `Database::init_with_config`.
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
    #[serde(default = "default_async_conn_num")]
    pub async_conn_num: usize,
    #[serde(default)]
    pub sync_path: SyncPath,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("db_name", &self.db_name)
            .field("async_conn_num", &self.async_conn_num)
            .field("sync_path", &self.sync_path)
            .finish()
    }
}

fn default_async_conn_num() -> usize {
    4
}

impl DbConfig {
    pub fn new(db_name: impl Into<String>) -> Self {
        DbConfig {
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            db_name: db_name.into(),
            async_conn_num: default_async_conn_num(),
            sync_path: SyncPath::default(),
        }
    }

    /// Checks the settings that would otherwise fail deep inside init.
    pub fn validate(&self) -> Result<()> {
        if self.async_conn_num == 0 {
            return Err(DbError::Config("async_conn_num must be at least 1".to_string()));
        }
        if self.db_name.trim().is_empty() {
            return Err(DbError::Config("db_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            db_name: self.db_name.clone(),
        }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = gamedb::config::load_config("gamedb.toml").expect("Failed to load config");
/// println!("{:?}", config.database.db_name);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(|e| DbError::Config(e.to_string()))?;
    config.database.validate()?;
    Ok(config)
}

//! Configuration for the migration tooling
//!
//! Loaded from an optional YAML file, then overridden by `MIGRA_*`
//! environment variables. `DATABASE_URL` replaces the individual database
//! fields when present.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::connection::{ConnectionSettings, PoolSettings};
use crate::dialect::Dialect;
use crate::security::validate_identifier;
use crate::store::DEFAULT_HISTORY_TABLE;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Where a configuration value came from, for `migra config`-style debugging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    File(String),
    Default,
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    pub database: ConnectionSettings,
    pub pool: PoolSettings,
    /// Directory holding `<version>_<name>.sql` files
    pub migrations_dir: PathBuf,
    pub history_table: String,
    /// Schema emptied by `db reset`; defaults per dialect
    pub schema: Option<String>,
    pub log_level: String,
    #[serde(skip)]
    sources: HashMap<String, ConfigSource>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database: ConnectionSettings::default(),
            pool: PoolSettings::default(),
            migrations_dir: PathBuf::from("migrations"),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            schema: None,
            log_level: "info".to_string(),
            sources: HashMap::new(),
        }
    }
}

impl MigrateConfig {
    /// Load from an optional file, apply the environment and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document: serde_yaml::Value = serde_yaml::from_str(&content)?;
        if document.is_null() {
            return Ok(Self::default());
        }

        let mut config: Self = serde_yaml::from_value(document.clone())?;
        let origin = ConfigSource::File(path.display().to_string());
        for field in ["database", "pool", "migrations_dir", "history_table", "schema", "log_level"] {
            if document.get(field).is_some() {
                config.sources.insert(field.to_string(), origin.clone());
            }
        }
        Ok(config)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            let dialect = Dialect::from_url(&url)
                .map_err(|_| ConfigError::invalid_value("DATABASE_URL", &url, "a postgres, mysql or sqlite URL"))?;
            self.database.dialect = dialect;
            self.database.url = Some(url);
            self.mark("database", "DATABASE_URL");
        }

        if let Some(value) = lookup("MIGRA_DB_DIALECT") {
            self.database.dialect = value
                .parse()
                .map_err(|_| ConfigError::invalid_value("MIGRA_DB_DIALECT", &value, "postgres, mysql or sqlite"))?;
            self.mark("database", "MIGRA_DB_DIALECT");
        }
        if let Some(value) = lookup("MIGRA_DB_HOST") {
            self.database.host = value;
            self.mark("database", "MIGRA_DB_HOST");
        }
        if let Some(value) = lookup("MIGRA_DB_PORT") {
            let port = value
                .parse::<u16>()
                .map_err(|_| ConfigError::invalid_value("MIGRA_DB_PORT", &value, "a port number"))?;
            self.database.port = Some(port);
            self.mark("database", "MIGRA_DB_PORT");
        }
        if let Some(value) = lookup("MIGRA_DB_USER") {
            self.database.user = value;
            self.mark("database", "MIGRA_DB_USER");
        }
        if let Some(value) = lookup("MIGRA_DB_PASSWORD") {
            self.database.password = Some(value);
            self.mark("database", "MIGRA_DB_PASSWORD");
        }
        if let Some(value) = lookup("MIGRA_DB_NAME") {
            self.database.database = value;
            self.mark("database", "MIGRA_DB_NAME");
        }
        if let Some(value) = lookup("MIGRA_DB_CHARSET") {
            self.database.charset = value;
            self.mark("database", "MIGRA_DB_CHARSET");
        }
        if let Some(value) = lookup("MIGRA_MIGRATIONS_DIR") {
            self.migrations_dir = PathBuf::from(value);
            self.mark("migrations_dir", "MIGRA_MIGRATIONS_DIR");
        }
        if let Some(value) = lookup("MIGRA_HISTORY_TABLE") {
            self.history_table = value;
            self.mark("history_table", "MIGRA_HISTORY_TABLE");
        }
        if let Some(value) = lookup("MIGRA_SCHEMA") {
            self.schema = Some(value);
            self.mark("schema", "MIGRA_SCHEMA");
        }
        if let Some(value) = lookup("MIGRA_LOG_LEVEL") {
            self.log_level = value;
            self.mark("log_level", "MIGRA_LOG_LEVEL");
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.history_table).map_err(|e| ConfigError::invalid_value(
            "history_table",
            &self.history_table,
            e.to_string(),
        ))?;

        if let Some(schema) = &self.schema {
            validate_identifier(schema)
                .map_err(|e| ConfigError::invalid_value("schema", schema, e.to_string()))?;
        }

        if self.database.url.is_none() && self.database.dialect != Dialect::Sqlite && self.database.host.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database.host".to_string(),
                hint: "Set MIGRA_DB_HOST or DATABASE_URL".to_string(),
            });
        }

        if self.pool.max_connections == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "pool.max_connections must be at least 1".to_string(),
            });
        }

        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::invalid_value(
                "log_level",
                &self.log_level,
                "trace, debug, info, warn or error",
            ));
        }

        Ok(())
    }

    /// Schema targeted by administrative operations
    ///
    /// PostgreSQL defaults to `public`, MySQL to the database name.
    pub fn effective_schema(&self) -> String {
        if let Some(schema) = &self.schema {
            return schema.clone();
        }
        match self.database.dialect {
            Dialect::Postgres => "public".to_string(),
            Dialect::MySql | Dialect::Sqlite => self.database_name(),
        }
    }

    /// Where each overridden field came from; unlisted fields are defaults
    pub fn source_of(&self, field: &str) -> ConfigSource {
        self.sources.get(field).cloned().unwrap_or(ConfigSource::Default)
    }

    fn database_name(&self) -> String {
        self.database
            .url
            .as_deref()
            .and_then(|url| url::Url::parse(url).ok())
            .map(|url| url.path().trim_start_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.database.database.clone())
    }

    fn mark(&mut self, field: &str, var: &str) {
        self.sources
            .insert(field.to_string(), ConfigSource::EnvVar(var.to_string()));
    }
}

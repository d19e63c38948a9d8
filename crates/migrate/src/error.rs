//! Error types for the migration engine
//!
//! Validation errors (`InvalidVersionFormat`, `AmbiguousVersion`) are raised
//! before any database mutation. Execution errors carry the version that
//! failed so a caller can fix the payload and re-run.

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Invalid version format '{input}': {reason}")]
    InvalidVersionFormat { input: String, reason: String },

    #[error("Ambiguous versions '{first}' and '{second}' compare equal")]
    AmbiguousVersion { first: String, second: String },

    #[error("Version {version} has already been applied")]
    DuplicateVersion { version: String },

    #[error(
        "Migration {version} failed (last applied: {}): {cause}",
        .last_applied.as_deref().unwrap_or("none")
    )]
    PayloadExecutionFailed {
        version: String,
        last_applied: Option<String>,
        #[source]
        cause: sqlx::Error,
    },

    #[error("Unsupported database dialect: {dialect}")]
    UnsupportedDialect { dialect: String },

    #[error("Database connection failed: {0}")]
    ConnectionError(#[source] sqlx::Error),

    #[error("Database error while {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Migration catalog error: {0}")]
    Catalog(String),

    #[error("Corrupt migration history: {0}")]
    CorruptHistory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Create an invalid version format error
    pub fn invalid_version(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVersionFormat {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a sqlx error with what the engine was doing at the time
    pub fn database(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            context: context.into(),
            source,
        }
    }

    /// The version a failed run stopped at, if the error is tied to one
    pub fn failing_version(&self) -> Option<&str> {
        match self {
            Self::PayloadExecutionFailed { version, .. } => Some(version),
            Self::DuplicateVersion { version } => Some(version),
            _ => None,
        }
    }

    /// Whether the executor may treat this error as "already applied"
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateVersion { .. })
    }
}

/// Classify a failed insert into the history table.
///
/// A primary key collision means another writer recorded the same version
/// first, which callers see as `DuplicateVersion`.
pub(crate) fn classify_insert_error(version: &str, err: sqlx::Error) -> MigrateError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            MigrateError::DuplicateVersion {
                version: version.to_string(),
            }
        }
        _ => MigrateError::database(format!("recording version {}", version), err),
    }
}

/// Map pool/connection level failures to `ConnectionError`, everything else to `Database`.
pub(crate) fn classify_connection_error(context: &str, err: sqlx::Error) -> MigrateError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => MigrateError::ConnectionError(err),
        other => MigrateError::database(context, other),
    }
}

//! Migration Store - Durable record of applied migrations
//!
//! Records live in a single history table. The store never interprets
//! payloads; it only answers which versions have been applied, and it is the
//! one place that refuses a second record for the same version.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::{Any, AnyConnection, AnyPool, Executor, Row};

use crate::catalog::MigrationSet;
use crate::dialect::Dialect;
use crate::error::{classify_connection_error, classify_insert_error, MigrateError, MigrateResult};
use crate::security::validate_identifier;
use crate::version::Version;

/// Default name of the history table
pub const DEFAULT_HISTORY_TABLE: &str = "migration_history";

/// One applied migration
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub version: Version,
    pub applied_at: DateTime<Utc>,
    pub payload_name: String,
}

/// Where a catalog entry stands relative to the history table
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationState {
    /// Recorded in the history table
    Applied { applied_at: DateTime<Utc> },
    /// Newer than the current version; the next run applies it
    Pending,
    /// Never recorded but older than the current version, so a forward-only
    /// run will not apply it
    Skipped,
    /// Recorded, but missing from the supplied catalog
    Orphaned { applied_at: DateTime<Utc> },
}

/// Status line for one version
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    pub version: Version,
    pub name: String,
    pub state: MigrationState,
}

/// History table access bound to an explicitly passed pool
#[derive(Debug, Clone)]
pub struct MigrationStore {
    pool: AnyPool,
    dialect: Dialect,
    table: String,
}

impl MigrationStore {
    /// Create a store over `pool` using the default history table
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            table: DEFAULT_HISTORY_TABLE.to_string(),
        }
    }

    /// Create a store with a custom history table name
    pub fn with_table(pool: AnyPool, dialect: Dialect, table: &str) -> MigrateResult<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            dialect,
            table: table.to_string(),
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist yet
    pub async fn ensure_table(&self) -> MigrateResult<()> {
        self.pool
            .execute(self.create_table_sql().as_str())
            .await
            .map_err(|e| classify_connection_error("creating the history table", e))?;
        Ok(())
    }

    /// Whether the history table exists, without creating it
    pub async fn table_exists(&self) -> MigrateResult<bool> {
        let sql = match self.dialect {
            Dialect::Postgres => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = lower({})",
                self.dialect.placeholder(1)
            ),
            Dialect::MySql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = {}",
                self.dialect.placeholder(1)
            ),
            Dialect::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = {}",
                self.dialect.placeholder(1)
            ),
        };
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(self.table.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_connection_error("looking up the history table", e))?;
        Ok(count > 0)
    }

    /// Highest recorded version, `None` when nothing has been applied
    pub async fn current_version(&self) -> MigrateResult<Option<Version>> {
        let records = self.fetch_records(&self.pool).await?;
        Ok(records.into_iter().map(|r| r.version).max())
    }

    /// All records in ascending version order
    pub async fn list(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let mut records = self.fetch_records(&self.pool).await?;
        records.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(records)
    }

    /// Append a record using a pooled connection
    pub async fn record(&self, version: &Version, payload_name: &str) -> MigrateResult<MigrationRecord> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify_connection_error("acquiring a connection", e))?;
        self.record_on(&mut conn, version, payload_name).await
    }

    /// Append a record on a caller-owned connection, usually an open transaction
    ///
    /// Fails with `DuplicateVersion` when a version comparing equal is already
    /// recorded, or when the insert loses a race on the primary key.
    pub async fn record_on(
        &self,
        conn: &mut AnyConnection,
        version: &Version,
        payload_name: &str,
    ) -> MigrateResult<MigrationRecord> {
        if self.is_recorded_on(conn, version).await? {
            return Err(MigrateError::DuplicateVersion {
                version: version.to_string(),
            });
        }
        self.insert_record(conn, version, payload_name).await
    }

    /// Insert without the equality pre-check; the primary key on the
    /// canonical version is the only guard left
    async fn insert_record(
        &self,
        conn: &mut AnyConnection,
        version: &Version,
        payload_name: &str,
    ) -> MigrateResult<MigrationRecord> {
        // Stored with microsecond precision; keep the returned record identical.
        let applied_at = Utc::now().trunc_subsecs(6);
        let sql = format!(
            "INSERT INTO {} (version_key, version, payload_name, applied_at) VALUES ({}, {}, {}, {})",
            self.table,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
            self.dialect.placeholder(4)
        );
        sqlx::query(&sql)
            .bind(version.canonical())
            .bind(version.as_str())
            .bind(payload_name)
            .bind(applied_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .execute(&mut *conn)
            .await
            .map_err(|e| classify_insert_error(version.as_str(), e))?;

        tracing::debug!(version = %version, payload = payload_name, "recorded migration");

        Ok(MigrationRecord {
            version: version.clone(),
            applied_at,
            payload_name: payload_name.to_string(),
        })
    }

    /// Whether a version equal to `version` is recorded, as seen by `conn`
    pub async fn is_recorded_on(&self, conn: &mut AnyConnection, version: &Version) -> MigrateResult<bool> {
        let records = self.fetch_records(&mut *conn).await?;
        Ok(records.iter().any(|r| &r.version == version))
    }

    /// Highest recorded version as seen by `conn`, usually an open transaction
    pub async fn current_version_on(&self, conn: &mut AnyConnection) -> MigrateResult<Option<Version>> {
        let records = self.fetch_records(&mut *conn).await?;
        Ok(records.into_iter().map(|r| r.version).max())
    }

    /// Cross-reference the catalog with the history table
    ///
    /// The result is ordered by version and also lists recorded versions the
    /// catalog no longer knows about.
    pub async fn status(&self, set: &MigrationSet) -> MigrateResult<Vec<MigrationStatus>> {
        let known = set.validate()?;
        let records = if self.table_exists().await? {
            self.list().await?
        } else {
            Vec::new()
        };
        let current = records.iter().map(|r| &r.version).max();

        let mut statuses: Vec<MigrationStatus> = known
            .iter()
            .map(|(version, payload)| {
                let state = match records.iter().find(|r| &r.version == version) {
                    Some(record) => MigrationState::Applied {
                        applied_at: record.applied_at,
                    },
                    None if current.map_or(true, |c| version > c) => MigrationState::Pending,
                    None => MigrationState::Skipped,
                };
                MigrationStatus {
                    version: version.clone(),
                    name: payload.name.clone(),
                    state,
                }
            })
            .collect();

        for record in &records {
            if !known.iter().any(|(v, _)| v == &record.version) {
                statuses.push(MigrationStatus {
                    version: record.version.clone(),
                    name: record.payload_name.clone(),
                    state: MigrationState::Orphaned {
                        applied_at: record.applied_at,
                    },
                });
            }
        }

        statuses.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(statuses)
    }

    async fn fetch_records<'e, E>(&self, executor: E) -> MigrateResult<Vec<MigrationRecord>>
    where
        E: Executor<'e, Database = Any>,
    {
        let sql = format!("SELECT version, payload_name, applied_at FROM {}", self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(executor)
            .await
            .map_err(|e| classify_connection_error("reading migration history", e))?;

        rows.iter()
            .map(|row| {
                let version: String = row
                    .try_get("version")
                    .map_err(|e| MigrateError::database("reading version column", e))?;
                let payload_name: String = row
                    .try_get("payload_name")
                    .map_err(|e| MigrateError::database("reading payload_name column", e))?;
                let applied_at: String = row
                    .try_get("applied_at")
                    .map_err(|e| MigrateError::database("reading applied_at column", e))?;

                let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        MigrateError::CorruptHistory(format!(
                            "version {} has unreadable applied_at '{}': {}",
                            version, applied_at, e
                        ))
                    })?;

                Ok(MigrationRecord {
                    version: Version::parse(&version)?,
                    applied_at,
                    payload_name,
                })
            })
            .collect()
    }

    /// `version_key` holds [`Version::canonical`], so the primary key rejects
    /// exactly the versions that compare equal. MySQL needs a binary collation
    /// for that, its default one folds case.
    fn create_table_sql(&self) -> String {
        let version_type = match self.dialect {
            Dialect::MySql => "VARCHAR(64) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin",
            Dialect::Postgres | Dialect::Sqlite => "VARCHAR(64)",
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \
                version_key {version_type} NOT NULL PRIMARY KEY,\n    \
                version {version_type} NOT NULL,\n    \
                payload_name VARCHAR(255) NOT NULL,\n    \
                applied_at VARCHAR(64) NOT NULL\n\
            )",
            table = self.table
        )
    }
}

//! Migration Executor - Applies pending migrations in version order
//!
//! A run validates the whole catalog, works out which versions are newer than
//! the store's current version and applies them one at a time. Each version
//! gets its own transaction holding both the payload and its history record.
//! A failing payload stops the run; versions applied before it stay applied.
//! Planning only reads, so a dry run leaves the database as it found it.

use std::time::Instant;

use sqlx::{AnyConnection, AnyPool, Executor};

use crate::catalog::MigrationSet;
use crate::dialect::Dialect;
use crate::error::{classify_connection_error, MigrateError, MigrateResult};
use crate::payload::executable_batch;
use crate::store::MigrationStore;
use crate::version::Version;

/// One migration scheduled to run
#[derive(Debug, Clone)]
pub struct PendingMigration {
    pub version: Version,
    pub name: String,
    pub sql: String,
}

/// What a run would do, computed without executing any payload
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub current_version: Option<Version>,
    /// Ascending by version
    pub pending: Vec<PendingMigration>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Version the store will report once every pending step succeeds
    pub fn target_version(&self) -> Option<&Version> {
        self.pending
            .last()
            .map(|p| &p.version)
            .or(self.current_version.as_ref())
    }
}

/// Result of running migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Versions applied by this run, in order
    pub applied: Vec<String>,
    /// Versions found already recorded by a concurrent run
    pub already_applied: Vec<String>,
    /// Versions left unapplied because a concurrent run moved the store past them
    pub skipped: Vec<String>,
    /// Current version after the run
    pub current_version: Option<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

enum StepFailure {
    Payload(sqlx::Error),
    Superseded { current: Version },
    Other(MigrateError),
}

impl From<MigrateError> for StepFailure {
    fn from(err: MigrateError) -> Self {
        StepFailure::Other(err)
    }
}

/// Applies a [`MigrationSet`] through a [`MigrationStore`]
#[derive(Debug, Clone)]
pub struct MigrationExecutor {
    store: MigrationStore,
}

impl MigrationExecutor {
    pub fn new(store: MigrationStore) -> Self {
        Self { store }
    }

    /// Executor over `pool` with the default history table
    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        Self::new(MigrationStore::new(pool, dialect))
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    /// Validate `set` and compute the pending versions
    ///
    /// Read-only: a missing history table means nothing has been applied.
    pub async fn plan(&self, set: &MigrationSet) -> MigrateResult<MigrationPlan> {
        let ordered = set.validate()?;

        let current_version = if self.store.table_exists().await? {
            self.store.current_version().await?
        } else {
            None
        };

        let pending: Vec<PendingMigration> = ordered
            .into_iter()
            .filter(|(version, _)| current_version.as_ref().map_or(true, |current| version > current))
            .map(|(version, payload)| PendingMigration {
                version,
                name: payload.name.clone(),
                sql: payload.sql.clone(),
            })
            .collect();

        tracing::debug!(
            current = current_version.as_ref().map(Version::as_str).unwrap_or("none"),
            pending = pending.len(),
            "computed migration plan"
        );

        Ok(MigrationPlan {
            current_version,
            pending,
        })
    }

    /// Apply every pending migration in `set`
    pub async fn run(&self, set: &MigrationSet) -> MigrateResult<MigrationRunResult> {
        let plan = self.plan(set).await?;
        self.apply(plan).await
    }

    /// Apply a previously computed plan
    ///
    /// Creates the history table when missing. Each step re-reads the history
    /// inside its transaction: a version another run already recorded lands in
    /// `already_applied`, one that is no longer newer than the current version
    /// lands in `skipped`. Neither is a failure.
    pub async fn apply(&self, plan: MigrationPlan) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();
        let mut result = MigrationRunResult::default();

        self.store.ensure_table().await?;

        if plan.is_empty() {
            tracing::info!("no pending migrations");
            result.current_version = plan.current_version.map(|v| v.to_string());
            result.execution_time_ms = start_time.elapsed().as_millis();
            return Ok(result);
        }

        let mut last_applied = plan.current_version.as_ref().map(ToString::to_string);

        for step in &plan.pending {
            match self.apply_one(step).await {
                Ok(()) => {
                    tracing::info!(version = %step.version, name = %step.name, "applied migration");
                    result.applied.push(step.version.to_string());
                    last_applied = Some(step.version.to_string());
                }
                Err(StepFailure::Other(MigrateError::DuplicateVersion { version })) => {
                    tracing::warn!(version = %version, "migration already recorded by another run, skipping");
                    result.already_applied.push(version.clone());
                    last_applied = Some(version);
                }
                Err(StepFailure::Superseded { current }) => {
                    tracing::warn!(version = %step.version, current = %current, "store moved past this version, skipping");
                    result.skipped.push(step.version.to_string());
                }
                Err(StepFailure::Payload(cause)) => {
                    tracing::error!(version = %step.version, error = %cause, "migration failed");
                    return Err(MigrateError::PayloadExecutionFailed {
                        version: step.version.to_string(),
                        last_applied,
                        cause,
                    });
                }
                Err(StepFailure::Other(err)) => return Err(err),
            }
        }

        result.current_version = self.store.current_version().await?.map(|v| v.to_string());
        result.execution_time_ms = start_time.elapsed().as_millis();
        Ok(result)
    }

    async fn apply_one(&self, step: &PendingMigration) -> Result<(), StepFailure> {
        let mut transaction = self
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| classify_connection_error("starting a transaction", e))?;

        match self.execute_step(&mut transaction, step).await {
            Ok(()) => transaction.commit().await.map_err(|e| {
                StepFailure::Other(MigrateError::database(
                    format!("committing migration {}", step.version),
                    e,
                ))
            }),
            Err(failure) => {
                if let Err(e) = transaction.rollback().await {
                    tracing::warn!(version = %step.version, "rollback failed: {}", e);
                }
                Err(failure)
            }
        }
    }

    async fn execute_step(&self, conn: &mut AnyConnection, step: &PendingMigration) -> Result<(), StepFailure> {
        // The plan may be stale; decide against the history this transaction sees.
        if self.store.is_recorded_on(conn, &step.version).await? {
            return Err(StepFailure::Other(MigrateError::DuplicateVersion {
                version: step.version.to_string(),
            }));
        }
        if let Some(current) = self.store.current_version_on(conn).await? {
            if current > step.version {
                return Err(StepFailure::Superseded { current });
            }
        }

        match executable_batch(self.store.dialect(), &step.sql) {
            Some(batch) => {
                tracing::trace!(version = %step.version, "executing: {}", batch);
                (&mut *conn).execute(batch).await.map_err(StepFailure::Payload)?;
            }
            None => tracing::debug!(version = %step.version, "payload holds no statements"),
        }

        self.store.record_on(conn, &step.version, &step.name).await?;
        Ok(())
    }
}

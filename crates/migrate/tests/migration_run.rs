//! End-to-end runs against an in-memory SQLite database

use migra::{
    connect, ConnectionSettings, Dialect, MigrateError, MigrationExecutor, MigrationSet, MigrationStore,
    PoolSettings, Version,
};
use sqlx::{AnyPool, Row};

async fn memory_pool() -> AnyPool {
    connect(&ConnectionSettings::sqlite_memory(), &PoolSettings::default())
        .await
        .unwrap()
}

async fn table_exists(pool: &AnyPool, table: &str) -> bool {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(table)
        .fetch_one(pool)
        .await
        .unwrap();
    row.get::<i64, _>("n") > 0
}

fn three_step_set() -> MigrationSet {
    MigrationSet::new()
        .with("2.0.0", "create_orders", "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER);")
        .unwrap()
        .with("1.0.0", "create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY);")
        .unwrap()
        .with(
            "1.1.0",
            "add_email",
            "ALTER TABLE users ADD COLUMN email TEXT;\nINSERT INTO users (id, email) VALUES (1, 'a;b@example.com');",
        )
        .unwrap()
}

#[tokio::test]
async fn test_empty_set_is_a_noop() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let result = executor.run(&MigrationSet::new()).await.unwrap();
    assert_eq!(result.applied_count(), 0);
    assert_eq!(result.current_version, None);
    assert!(executor.store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_applies_in_version_order() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let result = executor.run(&three_step_set()).await.unwrap();
    assert_eq!(result.applied, vec!["1.0.0", "1.1.0", "2.0.0"]);
    assert_eq!(result.current_version.as_deref(), Some("2.0.0"));

    let records = executor.store().list().await.unwrap();
    let versions: Vec<&str> = records.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1.0.0", "1.1.0", "2.0.0"]);
    assert_eq!(records[1].payload_name, "add_email");

    let email: String = sqlx::query("SELECT email FROM users WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("email");
    assert_eq!(email, "a;b@example.com");
}

#[tokio::test]
async fn test_empty_set_keeps_current_version() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool, Dialect::Sqlite);
    executor.run(&three_step_set()).await.unwrap();

    let result = executor.run(&MigrationSet::new()).await.unwrap();
    assert_eq!(result.applied_count(), 0);
    assert_eq!(result.current_version.as_deref(), Some("2.0.0"));

    let current = executor.store().current_version().await.unwrap().unwrap();
    assert_eq!(current.as_str(), "2.0.0");
    assert_eq!(executor.store().list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_trigger_payload_runs_as_one_batch() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let set = MigrationSet::new()
        .with(
            "1.0.0",
            "users_with_audit",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);\n\
             CREATE TABLE audit (user_id INTEGER);\n\
             CREATE TRIGGER users_ai AFTER INSERT ON users BEGIN\n    \
                 INSERT INTO audit VALUES (NEW.id);\n\
             END;\n",
        )
        .unwrap()
        .with("1.1.0", "seed", "INSERT INTO users (id) VALUES (7);")
        .unwrap();

    let result = executor.run(&set).await.unwrap();
    assert_eq!(result.applied, vec!["1.0.0", "1.1.0"]);

    let audited: i64 = sqlx::query("SELECT user_id FROM audit")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("user_id");
    assert_eq!(audited, 7);
}

#[tokio::test]
async fn test_comment_only_payload_is_recorded() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool, Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("1.0.0", "placeholder", "-- Migration: placeholder\n-- nothing yet\n")
        .unwrap();

    let result = executor.run(&set).await.unwrap();
    assert_eq!(result.applied, vec!["1.0.0"]);
}

#[tokio::test]
async fn test_planning_does_not_create_the_history_table() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let plan = executor.plan(&three_step_set()).await.unwrap();
    assert_eq!(plan.current_version, None);
    assert_eq!(plan.pending.len(), 3);
    assert!(!table_exists(&pool, "migration_history").await);
}

#[tokio::test]
async fn test_stale_plan_skips_versions_below_current() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("1.0.0", "create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY)")
        .unwrap()
        .with("1.1.0", "create_orders", "CREATE TABLE orders (id INTEGER PRIMARY KEY)")
        .unwrap()
        .with("3.0.0", "create_invoices", "CREATE TABLE invoices (id INTEGER PRIMARY KEY)")
        .unwrap();
    let plan = executor.plan(&set).await.unwrap();

    // Another runner reaches 2.0.0 before this plan is applied.
    let other = MigrationStore::new(pool.clone(), Dialect::Sqlite);
    other.ensure_table().await.unwrap();
    other
        .record(&Version::parse("2.0.0").unwrap(), "elsewhere")
        .await
        .unwrap();

    let result = executor.apply(plan).await.unwrap();
    assert_eq!(result.skipped, vec!["1.0.0", "1.1.0"]);
    assert_eq!(result.applied, vec!["3.0.0"]);
    assert_eq!(result.current_version.as_deref(), Some("3.0.0"));

    assert!(!table_exists(&pool, "users").await);
    assert!(!table_exists(&pool, "orders").await);
    assert!(table_exists(&pool, "invoices").await);
}

#[tokio::test]
async fn test_rerun_applies_nothing() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool, Dialect::Sqlite);
    let set = three_step_set();

    executor.run(&set).await.unwrap();
    let second = executor.run(&set).await.unwrap();

    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.current_version.as_deref(), Some("2.0.0"));
    assert_eq!(executor.store().list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_only_newer_versions_run() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool, Dialect::Sqlite);

    let first = MigrationSet::new()
        .with("1.0.0", "create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY)")
        .unwrap()
        .with("1.2.0", "create_orders", "CREATE TABLE orders (id INTEGER PRIMARY KEY)")
        .unwrap();
    executor.run(&first).await.unwrap();

    // 1.1.0 is older than the current version and is never applied.
    let second = first
        .clone()
        .with("1.1.0", "late", "CREATE TABLE late (id INTEGER)")
        .unwrap()
        .with("1.10.0", "audit", "CREATE TABLE audit (id INTEGER)")
        .unwrap();
    let result = executor.run(&second).await.unwrap();

    assert_eq!(result.applied, vec!["1.10.0"]);
    assert_eq!(result.current_version.as_deref(), Some("1.10.0"));
    assert!(!table_exists(executor.store().pool(), "late").await);
}

#[tokio::test]
async fn test_failure_stops_the_run_and_keeps_earlier_steps() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("1.0.0", "create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY)")
        .unwrap()
        .with(
            "1.1.0",
            "broken",
            "CREATE TABLE half_done (id INTEGER);\nINSERT INTO no_such_table VALUES (1);",
        )
        .unwrap()
        .with("2.0.0", "never", "CREATE TABLE never_created (id INTEGER)")
        .unwrap();

    let err = executor.run(&set).await.unwrap_err();
    match &err {
        MigrateError::PayloadExecutionFailed {
            version,
            last_applied,
            ..
        } => {
            assert_eq!(version, "1.1.0");
            assert_eq!(last_applied.as_deref(), Some("1.0.0"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.failing_version(), Some("1.1.0"));

    let current = executor.store().current_version().await.unwrap().unwrap();
    assert_eq!(current.as_str(), "1.0.0");

    // The failed step was rolled back as a whole.
    assert!(table_exists(&pool, "users").await);
    assert!(!table_exists(&pool, "half_done").await);
    assert!(!table_exists(&pool, "never_created").await);
}

#[tokio::test]
async fn test_failure_on_first_step_reports_no_last_applied() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool, Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("0.1.0", "typo", "CREAT TABLE users (id INTEGER)")
        .unwrap();

    let err = executor.run(&set).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::PayloadExecutionFailed { ref version, last_applied: None, .. } if version == "0.1.0"
    ));
    assert!(err.to_string().contains("last applied: none"));
    assert_eq!(executor.store().current_version().await.unwrap(), None);
}

#[tokio::test]
async fn test_ambiguous_versions_abort_before_touching_the_database() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("1.0", "short", "CREATE TABLE short_form (id INTEGER)")
        .unwrap()
        .with("1.0.0", "long", "CREATE TABLE long_form (id INTEGER)")
        .unwrap();

    let err = executor.run(&set).await.unwrap_err();
    assert!(matches!(err, MigrateError::AmbiguousVersion { .. }));

    assert!(!table_exists(&pool, "migration_history").await);
    assert!(!table_exists(&pool, "short_form").await);
    assert!(!table_exists(&pool, "long_form").await);
}

#[tokio::test]
async fn test_invalid_version_aborts_the_run() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("1.0.0", "ok", "CREATE TABLE ok_table (id INTEGER)")
        .unwrap()
        .with("latest", "bad", "CREATE TABLE bad_table (id INTEGER)")
        .unwrap();

    let err = executor.run(&set).await.unwrap_err();
    assert!(matches!(err, MigrateError::InvalidVersionFormat { ref input, .. } if input == "latest"));
    assert!(!table_exists(&pool, "ok_table").await);
}

#[tokio::test]
async fn test_version_recorded_after_planning_is_skipped() {
    let pool = memory_pool().await;
    let executor = MigrationExecutor::from_pool(pool.clone(), Dialect::Sqlite);

    let set = MigrationSet::new()
        .with("1.0.0", "create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY)")
        .unwrap()
        .with("1.1.0", "create_orders", "CREATE TABLE orders (id INTEGER PRIMARY KEY)")
        .unwrap();

    let plan = executor.plan(&set).await.unwrap();
    assert_eq!(plan.pending.len(), 2);
    assert_eq!(plan.target_version().map(Version::as_str), Some("1.1.0"));

    // Another runner records 1.0.0 between planning and applying.
    let other = MigrationStore::new(pool.clone(), Dialect::Sqlite);
    other.ensure_table().await.unwrap();
    other
        .record(&Version::parse("1.0.0").unwrap(), "create_users")
        .await
        .unwrap();

    let result = executor.apply(plan).await.unwrap();
    assert_eq!(result.already_applied, vec!["1.0.0"]);
    assert_eq!(result.applied, vec!["1.1.0"]);
    assert_eq!(result.current_version.as_deref(), Some("1.1.0"));

    // The skipped payload never ran.
    assert!(!table_exists(&pool, "users").await);
    assert!(table_exists(&pool, "orders").await);
}

#[tokio::test]
async fn test_custom_history_table() {
    let pool = memory_pool().await;
    let store = MigrationStore::with_table(pool.clone(), Dialect::Sqlite, "schema_versions").unwrap();
    let executor = MigrationExecutor::new(store);

    executor.run(&three_step_set()).await.unwrap();

    assert!(table_exists(&pool, "schema_versions").await);
    assert!(!table_exists(&pool, "migration_history").await);
}

//! Dialect Admin Operations - Environment reset helpers
//!
//! Dropping every table of a schema has no portable SQL form, so each dialect
//! ships its own procedural script. PostgreSQL can cascade in one block;
//! MySQL first removes every foreign key and then every table. Both scripts
//! only touch objects that still exist, so running them on an empty schema
//! is a no-op.
//!
//! This is unrelated to migration history: the history table is dropped along
//! with everything else.

use std::fmt;

use async_trait::async_trait;
use sqlx::{AnyPool, Executor};

use crate::dialect::Dialect;
use crate::error::{classify_connection_error, MigrateError, MigrateResult};
use crate::security::{quote_identifier, validate_identifier};

/// Administrative operations implemented per dialect
#[async_trait]
pub trait SchemaAdmin: Send + Sync + fmt::Debug {
    /// Dialect this strategy targets
    fn dialect(&self) -> Dialect;

    /// Statements that drop every table in `schema`, in execution order
    fn drop_all_tables_script(&self, schema: &str) -> MigrateResult<Vec<String>>;

    /// Drop every table (and the constraints between them) in `schema`
    ///
    /// Irreversible. All statements run on one connection.
    async fn drop_all_tables(&self, pool: &AnyPool, schema: &str) -> MigrateResult<()> {
        let script = self.drop_all_tables_script(schema)?;

        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| classify_connection_error("acquiring a connection", e))?;

        for statement in &script {
            (&mut *conn)
                .execute(statement.as_str())
                .await
                .map_err(|e| MigrateError::database(format!("dropping tables in schema {}", schema), e))?;
        }

        tracing::info!(dialect = %self.dialect(), schema, "dropped all tables");
        Ok(())
    }
}

/// Pick the teardown strategy for a dialect
///
/// Dialects without a strategy fail with `UnsupportedDialect`; there is no
/// generic fallback.
pub fn admin_for(dialect: Dialect) -> MigrateResult<Box<dyn SchemaAdmin>> {
    match dialect {
        Dialect::Postgres => Ok(Box::new(PostgresAdmin)),
        Dialect::MySql => Ok(Box::new(MySqlAdmin)),
        Dialect::Sqlite => Err(MigrateError::UnsupportedDialect {
            dialect: dialect.to_string(),
        }),
    }
}

/// PostgreSQL: one anonymous block dropping each table with `CASCADE`
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdmin;

#[async_trait]
impl SchemaAdmin for PostgresAdmin {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn drop_all_tables_script(&self, schema: &str) -> MigrateResult<Vec<String>> {
        validate_identifier(schema)?;
        Ok(vec![format!(
            r#"DO $$
DECLARE
    r RECORD;
BEGIN
    FOR r IN (SELECT tablename FROM pg_tables WHERE schemaname = '{schema}') LOOP
        EXECUTE 'DROP TABLE IF EXISTS ' || quote_ident('{schema}') || '.' || quote_ident(r.tablename) || ' CASCADE';
    END LOOP;
END $$"#
        )])
    }
}

/// MySQL: drop foreign keys first, then tables, through temporary procedures
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlAdmin;

const DROP_FOREIGN_KEYS_PROC: &str = "migra_drop_foreign_keys";
const DROP_TABLES_PROC: &str = "migra_drop_tables";

#[async_trait]
impl SchemaAdmin for MySqlAdmin {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn drop_all_tables_script(&self, schema: &str) -> MigrateResult<Vec<String>> {
        validate_identifier(schema)?;
        let qualified = quote_identifier(Dialect::MySql, schema);

        // 1091: constraint already gone. 1051: table already gone.
        let drop_foreign_keys = format!(
            r#"CREATE PROCEDURE {qualified}.{DROP_FOREIGN_KEYS_PROC}()
BEGIN
    DECLARE done INT DEFAULT 0;
    DECLARE tbl VARCHAR(64);
    DECLARE fk VARCHAR(64);
    DECLARE cur CURSOR FOR
        SELECT TABLE_NAME, CONSTRAINT_NAME
        FROM information_schema.REFERENTIAL_CONSTRAINTS
        WHERE CONSTRAINT_SCHEMA = '{schema}';
    DECLARE CONTINUE HANDLER FOR NOT FOUND SET done = 1;
    DECLARE CONTINUE HANDLER FOR 1091 BEGIN END;

    OPEN cur;
    drop_loop: LOOP
        FETCH cur INTO tbl, fk;
        IF done THEN
            LEAVE drop_loop;
        END IF;
        SET @migra_stmt = CONCAT('ALTER TABLE `{schema}`.`', tbl, '` DROP FOREIGN KEY `', fk, '`');
        PREPARE stmt FROM @migra_stmt;
        EXECUTE stmt;
        DEALLOCATE PREPARE stmt;
    END LOOP;
    CLOSE cur;
END"#
        );

        let drop_tables = format!(
            r#"CREATE PROCEDURE {qualified}.{DROP_TABLES_PROC}()
BEGIN
    DECLARE done INT DEFAULT 0;
    DECLARE tbl VARCHAR(64);
    DECLARE cur CURSOR FOR
        SELECT TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = '{schema}' AND TABLE_TYPE = 'BASE TABLE';
    DECLARE CONTINUE HANDLER FOR NOT FOUND SET done = 1;
    DECLARE CONTINUE HANDLER FOR 1051 BEGIN END;

    OPEN cur;
    drop_loop: LOOP
        FETCH cur INTO tbl;
        IF done THEN
            LEAVE drop_loop;
        END IF;
        SET @migra_stmt = CONCAT('DROP TABLE IF EXISTS `{schema}`.`', tbl, '`');
        PREPARE stmt FROM @migra_stmt;
        EXECUTE stmt;
        DEALLOCATE PREPARE stmt;
    END LOOP;
    CLOSE cur;
END"#
        );

        let mut script = Vec::with_capacity(8);
        for (procedure, body) in [(DROP_FOREIGN_KEYS_PROC, drop_foreign_keys), (DROP_TABLES_PROC, drop_tables)] {
            script.push(format!("DROP PROCEDURE IF EXISTS {qualified}.{procedure}"));
            script.push(body);
            script.push(format!("CALL {qualified}.{procedure}()"));
            script.push(format!("DROP PROCEDURE IF EXISTS {qualified}.{procedure}"));
        }
        Ok(script)
    }
}

//! Preparing migration payloads for execution
//!
//! A payload is handed to the driver whole, as one batch: trigger and routine
//! bodies carry their own semicolons, and only the server knows where its
//! compound statements end. The dialect's tokenizer is used solely to tell a
//! payload that holds SQL from one that holds only whitespace and comments,
//! which some servers reject as an empty query.

use sqlparser::tokenizer::{Token, Tokenizer};

use crate::dialect::Dialect;

/// The batch to execute for `sql`, or `None` when there is nothing to run
///
/// When the tokenizer rejects the payload it is still returned, so the
/// server reports the actual syntax error.
pub fn executable_batch(dialect: Dialect, sql: &str) -> Option<&str> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return None;
    }

    let sql_dialect = dialect.sql_dialect();
    match Tokenizer::new(sql_dialect.as_ref(), trimmed).tokenize() {
        Ok(tokens) => tokens
            .iter()
            .any(|token| !matches!(token, Token::Whitespace(_) | Token::SemiColon | Token::EOF))
            .then_some(trimmed),
        Err(e) => {
            tracing::debug!("payload did not tokenize, leaving it to the server: {}", e);
            Some(trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_statement_payload_is_one_batch() {
        let sql = "CREATE TABLE users (id INTEGER);\nINSERT INTO users VALUES (1);\n";
        assert_eq!(
            executable_batch(Dialect::Sqlite, sql),
            Some("CREATE TABLE users (id INTEGER);\nINSERT INTO users VALUES (1);")
        );
    }

    #[test]
    fn test_trigger_body_is_kept_whole() {
        let sql = "CREATE TABLE audit (user_id INTEGER);\n\
                   CREATE TRIGGER users_ai AFTER INSERT ON users BEGIN\n  \
                   INSERT INTO audit VALUES (NEW.id);\nEND;";
        let batch = executable_batch(Dialect::Sqlite, sql).unwrap();
        assert_eq!(batch, sql);
        assert!(batch.ends_with("INSERT INTO audit VALUES (NEW.id);\nEND;"));
    }

    #[test]
    fn test_mysql_procedure_body_is_kept_whole() {
        let sql = "CREATE PROCEDURE touch_all()\nBEGIN\n  UPDATE items SET touched = 1;\n  UPDATE orders SET touched = 1;\nEND";
        assert_eq!(executable_batch(Dialect::MySql, sql), Some(sql));
    }

    #[test]
    fn test_comment_only_payload_has_nothing_to_run() {
        assert_eq!(executable_batch(Dialect::Sqlite, ""), None);
        assert_eq!(executable_batch(Dialect::MySql, "  \n-- nothing here\n/* or here */;\n"), None);
        assert_eq!(executable_batch(Dialect::Postgres, "-- Migration: x\n-- Version: 1.0.0\n\n"), None);
    }

    #[test]
    fn test_leading_comments_are_kept() {
        let sql = "-- Migration: add users\nCREATE TABLE users (id INTEGER); -- trailing";
        assert_eq!(executable_batch(Dialect::Postgres, sql), Some(sql));
    }

    #[test]
    fn test_untokenizable_payload_goes_to_the_server() {
        let sql = "SELECT 'open; SELECT 2";
        assert_eq!(executable_batch(Dialect::Sqlite, sql), Some(sql));
    }
}

//! Identifier checks for names interpolated into SQL
//!
//! The history table name and the schema handed to the teardown scripts end
//! up inside SQL text (procedural blocks cannot take bind parameters), so they
//! are restricted to plain identifiers before use.

use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

/// MySQL caps identifiers at 64 characters, PostgreSQL at 63
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate that an identifier is safe to interpolate into SQL
pub fn validate_identifier(identifier: &str) -> MigrateResult<()> {
    let invalid = |reason: &str| MigrateError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    let first = identifier.chars().next().ok_or_else(|| invalid("identifier cannot be empty"))?;

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("identifier is longer than 63 characters"));
    }

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid("identifier must start with a letter or underscore"));
    }

    if let Some(c) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(invalid(&format!("contains invalid character '{}'", c)));
    }

    Ok(())
}

/// Quote a validated identifier for the dialect
pub fn quote_identifier(dialect: Dialect, identifier: &str) -> String {
    match dialect {
        Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
        Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for ok in ["public", "migration_history", "_private", "Schema2"] {
            assert!(validate_identifier(ok).is_ok(), "{ok} should be valid");
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        let too_long = "a".repeat(64);
        for bad in ["", "1abc", "drop table", "a;b", "x'--", "na\"me", too_long.as_str()] {
            assert!(
                matches!(validate_identifier(bad), Err(MigrateError::InvalidIdentifier { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier(Dialect::Postgres, "users"), "\"users\"");
        assert_eq!(quote_identifier(Dialect::MySql, "users"), "`users`");
        assert_eq!(quote_identifier(Dialect::Sqlite, "us\"ers"), "\"us\"\"ers\"");
    }
}

//! SQLite error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqliteError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl SqliteError {
    /// Map a unique-constraint violation to `Conflict`
    pub fn from_insert(e: sqlx::Error, what: impl Into<String>) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(what.into())
            }
            other => Self::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = SqliteError::MigrationFailed {
            version: 2,
            name: "add_history_index".to_string(),
            error: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_history_index) failed: syntax error"
        );
    }

    #[test]
    fn test_non_database_error_passes_through() {
        let err = SqliteError::from_insert(sqlx::Error::RowNotFound, "x");
        assert!(matches!(err, SqliteError::Database(_)));
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the linked table engine
//!
//! Remote driver failures arrive as [`RemoteError`]. The connection layer is
//! the only place that turns them into an [`EngineError`], so callers of the
//! linked table always see one of the variants below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all linked table operations
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineError {
    /// The remote endpoint is unreachable or its metadata could not be read.
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The remote table name resolves to more than one catalog/schema entry.
    #[error("Remote table name is ambiguous, the schema name must be given: {table}")]
    AmbiguousTable { table: String },

    #[error("Remote table not found or not accessible: {table} ({message})")]
    TableNotFound { table: String, message: String },

    /// A statement failed on the remote side after the retry budget was used up.
    #[error("Error accessing linked table with SQL statement \"{sql}\", cause: {message}")]
    LinkedTableAccess { sql: String, message: String },

    #[error("Linked table is read only: {table}")]
    ReadOnly { table: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Linked table has been dropped: {table}")]
    Invalidated { table: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn ambiguous_table(table: impl Into<String>) -> Self {
        Self::AmbiguousTable { table: table.into() }
    }

    pub fn table_not_found(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Wraps a remote failure together with the statement that caused it.
    pub fn linked_table_access(sql: impl Into<String>, err: &RemoteError) -> Self {
        Self::LinkedTableAccess {
            sql: sql.into(),
            message: err.to_string(),
        }
    }

    pub fn read_only(table: impl Into<String>) -> Self {
        Self::ReadOnly { table: table.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn invalidated(table: impl Into<String>) -> Self {
        Self::Invalidated { table: table.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Whether a fresh connection could make this error go away.
    ///
    /// Local failures and catalog ambiguity are final; anything that came
    /// back from the remote side is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::TableNotFound { .. }
                | Self::LinkedTableAccess { .. }
                | Self::Internal { .. }
        )
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by a remote driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    /// Five character SQLSTATE when the driver reports one.
    pub sql_state: Option<String>,
}

impl RemoteError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            sql_state: None,
        }
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }
}

impl From<sqlx::Error> for RemoteError {
    fn from(err: sqlx::Error) -> Self {
        let sql_state = match &err {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };
        Self {
            message: err.to_string(),
            sql_state,
        }
    }
}

/// Result type alias for remote driver calls
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_failures_are_not_retryable() {
        assert!(!EngineError::read_only("T").is_retryable());
        assert!(!EngineError::not_supported("LINK").is_retryable());
        assert!(!EngineError::ambiguous_table("T").is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(EngineError::connection_failed("refused").is_retryable());
        assert!(EngineError::table_not_found("T", "missing").is_retryable());
    }

    #[test]
    fn access_error_carries_sql_and_remote_message() {
        let remote = RemoteError::new("relation \"t\" does not exist").with_sql_state("42P01");
        let err = EngineError::linked_table_access("SELECT * FROM t", &remote);
        let text = err.to_string();
        assert!(text.contains("SELECT * FROM t"));
        assert!(text.contains("relation \"t\" does not exist"));
    }

    #[test]
    fn sticky_error_round_trips_through_serde() {
        let err = EngineError::connection_failed("timeout");
        let json = serde_json::to_string(&err).expect("serialize");
        let back: EngineError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err, back);
    }
}

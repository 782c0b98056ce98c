//! Engine error types
//!
//! Every failure that crosses the driver boundary is an `EngineError`. The
//! variants map onto the categories a caller needs to tell apart: nothing
//! configured, engine unreachable, SQL rejected, request invalid.

use serde::Serialize;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Database not configured: {name}")]
    NotConfigured { name: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("SQL syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query error: {message}")]
    ExecutionError { message: String },

    #[error("Table {table} cannot be edited: {reason}")]
    NotEditable { table: String, reason: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation blocked: {name} is read-only")]
    ReadOnly { name: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse error category reported alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConfigured,
    Connection,
    Query,
    InvalidInput,
    NotEditable,
    ReadOnly,
    Internal,
}

impl EngineError {
    pub fn not_configured(name: impl Into<String>) -> Self {
        Self::NotConfigured { name: name.into() }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
        }
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
        }
    }

    pub fn not_editable(table: impl Into<String>) -> Self {
        Self::NotEditable {
            table: table.into(),
            reason: "it has no primary key".to_string(),
        }
    }

    pub fn composite_key(table: impl Into<String>, columns: &[String]) -> Self {
        Self::NotEditable {
            table: table.into(),
            reason: format!("its primary key spans several columns ({})", columns.join(", ")),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn read_only(name: impl Into<String>) -> Self {
        Self::ReadOnly { name: name.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classifies a sqlx error raised while running a statement.
    pub fn from_query(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::connection_failed(err.to_string()),
            other => {
                let msg = other.to_string();
                if msg.contains("syntax error") || msg.contains("You have an error in your SQL syntax") {
                    Self::syntax_error(msg)
                } else {
                    Self::execution_error(msg)
                }
            }
        }
    }

    /// Classifies a sqlx error raised while opening a pool.
    pub fn from_connect(err: sqlx::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("password authentication failed") || msg.contains("Access denied") {
            Self::auth_failed(msg)
        } else {
            Self::connection_failed(msg)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured { .. } => ErrorKind::NotConfigured,
            Self::ConnectionFailed { .. } | Self::AuthFailed { .. } | Self::Timeout { .. } => {
                ErrorKind::Connection
            }
            Self::SyntaxError { .. } | Self::ExecutionError { .. } => ErrorKind::Query,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NotEditable { .. } => ErrorKind::NotEditable,
            Self::ReadOnly { .. } => ErrorKind::ReadOnly,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

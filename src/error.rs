//! Error types for the query compiler and execution layer.
//!
//! Three kinds of failure exist, and they never mix:
//! - [`CompileError`]: a malformed intent detected before any network call.
//! - [`DriverError`]: a connection or statement failure reported by
//!   PostgreSQL, captured into an owned value and surfaced verbatim.
//! - `Validation`: a report request whose top-level shape does not match
//!   the report schema.
//!
//! No error is retried here; retry policy belongs to the caller.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Failures detected while turning an intent into SQL text.
///
/// All of these are raised before a connection is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("no target table set")]
    MissingTable,

    #[error("insert payload has no effective fields")]
    EmptyPayload,

    #[error("group scalar requires a key")]
    MissingScalarKey,

    #[error("raw query intent carries no SQL text")]
    MissingRawSql,
}

/// Categorized error classes for statement failures.
///
/// Derived from the SQLSTATE class of the server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE 42601 and friends)
    Syntax,
    /// Missing table/column, ambiguous reference
    Semantic,
    /// Runtime failures: constraint violations, division by zero
    Execution,
    /// Transaction state errors
    Transaction,
    /// Connection/communication errors
    Connection,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Owned capture of a PostgreSQL error response.
///
/// Keeping an owned value instead of `tokio_postgres::Error` lets fake
/// drivers in tests construct failures, and frees callers from borrowing
/// the driver's error type.
#[derive(Debug, Clone)]
pub struct DriverError {
    pub category: ErrorCategory,
    /// SQLSTATE code, empty for non-database failures.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
}

impl DriverError {
    pub fn from_pg_error(err: &tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            DriverError {
                category: categorize_sqlstate(&code),
                code,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                column: db_err.column().map(|s| s.to_string()),
                constraint: db_err.constraint().map(|s| s.to_string()),
            }
        } else {
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            DriverError {
                category,
                code: String::new(),
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                hint: None,
                table: None,
                column: None,
                constraint: None,
            }
        }
    }

    /// A non-database failure described by a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        DriverError {
            category: ErrorCategory::Unknown,
            code: String::new(),
            message: msg.into(),
            detail: None,
            hint: None,
            table: None,
            column: None,
            constraint: None,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            write!(f, "{}: {}", self.category, self.message)
        } else {
            write!(f, "{} [{}]: {}", self.category, self.code, self.message)
        }
    }
}

impl StdError for DriverError {}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        DriverError::from_pg_error(&err)
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(err: tokio_postgres::Error) -> Self {
        PgError::Driver(DriverError::from_pg_error(&err))
    }
}

/// Categorize a SQLSTATE code into an [`ErrorCategory`].
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        // Class 22: Data Exception; 23: Integrity Constraint Violation
        "22" | "23" => ErrorCategory::Execution,
        // Class 25: Invalid Transaction State; 40: Transaction Rollback
        "25" | "40" => ErrorCategory::Transaction,
        // Class 08: Connection Exception
        "08" => ErrorCategory::Connection,
        // Resource and operator-intervention classes
        "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        _ => ErrorCategory::Unknown,
    }
}

//! Driver primitive consumed by the pool.
//!
//! A driver opens physical connections and executes single statements. Everything
//! above it (pooling, timeouts, metrics, classification) lives in this crate. Driver
//! failures are reported as a tagged [`DriverErrorKind`], which the adapter produces
//! from whatever the underlying client library raises.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Tagged failure kinds produced by driver adapters and by the pool itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverErrorKind {
    // Constraint / integrity
    UniqueViolation,
    ForeignKeyViolation,
    CheckViolation,
    NotNullViolation,
    IntegrityError,

    // Connectivity / operational
    ConnectionFailure,
    ConnectionLost,
    OperationalError,
    Deadlock,
    SerializationFailure,

    // Timeouts
    PoolExhausted,
    AcquireTimeout,
    StatementTimeout,
    TransactionTimeout,

    // Malformed statement / data
    SyntaxError,
    AccessDenied,
    DataError,
    InvalidStatement,

    /// Anything the adapter could not map, with the raw code when one exists.
    Other(Option<String>),
}

impl DriverErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            DriverErrorKind::UniqueViolation => "UniqueViolation",
            DriverErrorKind::ForeignKeyViolation => "ForeignKeyViolation",
            DriverErrorKind::CheckViolation => "CheckViolation",
            DriverErrorKind::NotNullViolation => "NotNullViolation",
            DriverErrorKind::IntegrityError => "IntegrityError",
            DriverErrorKind::ConnectionFailure => "ConnectionFailure",
            DriverErrorKind::ConnectionLost => "ConnectionLost",
            DriverErrorKind::OperationalError => "OperationalError",
            DriverErrorKind::Deadlock => "Deadlock",
            DriverErrorKind::SerializationFailure => "SerializationFailure",
            DriverErrorKind::PoolExhausted => "PoolExhausted",
            DriverErrorKind::AcquireTimeout => "ConnectionTimeout",
            DriverErrorKind::StatementTimeout => "StatementTimeout",
            DriverErrorKind::TransactionTimeout => "TransactionTimeout",
            DriverErrorKind::SyntaxError => "SyntaxError",
            DriverErrorKind::AccessDenied => "AccessDenied",
            DriverErrorKind::DataError => "DataError",
            DriverErrorKind::InvalidStatement => "InvalidStatement",
            DriverErrorKind::Other(_) => "DatabaseError",
        }
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of a single statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementResult {
    pub rows_affected: u64,
    /// First returned row rendered as text, for row-returning statements.
    pub first_row: Option<Vec<Option<String>>>,
}

impl StatementResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            first_row: None,
        }
    }

    pub fn row(values: Vec<Option<String>>) -> Self {
        Self {
            rows_affected: 1,
            first_row: Some(values),
        }
    }
}

/// Opens physical connections.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError>;

    /// Human-readable backend name for logs and pool info.
    fn name(&self) -> &str {
        "database"
    }
}

/// A single open physical connection.
#[async_trait]
pub trait DriverConnection: Send + 'static {
    async fn execute(&mut self, sql: &str) -> Result<StatementResult, DriverError>;

    /// Liveness probe used for pre-ping on checkout.
    async fn ping(&mut self) -> Result<(), DriverError> {
        self.execute("SELECT 1").await.map(|_| ())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

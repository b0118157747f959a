use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::driver::{DriverError, DriverErrorKind};
use crate::error::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConstraintViolation,
    ConnectionUnavailable,
    Timeout,
    MalformedStatement,
    Unclassified,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::ConnectionUnavailable | ErrorCategory::Timeout)
    }

    fn default_response(&self) -> ResponseCategory {
        match self {
            ErrorCategory::ConstraintViolation => ResponseCategory::Conflict,
            ErrorCategory::ConnectionUnavailable => ResponseCategory::Unavailable,
            ErrorCategory::Timeout => ResponseCategory::GatewayTimeout,
            ErrorCategory::MalformedStatement => ResponseCategory::BadRequest,
            ErrorCategory::Unclassified => ResponseCategory::InternalError,
        }
    }
}

/// Transport-neutral response class, mapped onto HTTP status codes at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    Conflict,
    Unavailable,
    GatewayTimeout,
    BadRequest,
    InternalError,
}

impl ResponseCategory {
    pub fn status_code(&self) -> u16 {
        match self {
            ResponseCategory::Conflict => 409,
            ResponseCategory::Unavailable => 503,
            ResponseCategory::GatewayTimeout => 504,
            ResponseCategory::BadRequest => 400,
            ResponseCategory::InternalError => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub response: ResponseCategory,
    pub status_code: u16,
    pub detail: String,
    pub retryable: bool,
}

impl Classification {
    fn new(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self::with_response(category, category.default_response(), detail)
    }

    fn with_response(category: ErrorCategory, response: ResponseCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            response,
            status_code: response.status_code(),
            detail: detail.into(),
            // Always derived from the category; sub-kinds only refine detail and response.
            retryable: category.is_retryable(),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.status_code)
    }
}

pub fn classify(kind: &DriverErrorKind) -> Classification {
    use DriverErrorKind::*;
    use ErrorCategory::*;

    match kind {
        UniqueViolation => Classification::new(ConstraintViolation, "Unique constraint violation"),
        ForeignKeyViolation => {
            Classification::new(ConstraintViolation, "Foreign key constraint violation")
        }
        CheckViolation => Classification::with_response(
            ConstraintViolation,
            ResponseCategory::BadRequest,
            "Data validation constraint violation",
        ),
        NotNullViolation => Classification::new(ConstraintViolation, "Not-null constraint violation"),
        IntegrityError => Classification::new(ConstraintViolation, "Data integrity constraint violation"),

        ConnectionFailure => Classification::new(ConnectionUnavailable, "Database connection failed"),
        ConnectionLost => Classification::new(ConnectionUnavailable, "Database connection lost"),
        OperationalError => Classification::new(ConnectionUnavailable, "Database operation failed"),
        Deadlock => Classification::new(ConnectionUnavailable, "Deadlock detected"),
        SerializationFailure => {
            Classification::new(ConnectionUnavailable, "Transaction serialization failure")
        }

        PoolExhausted => Classification::new(Timeout, "Connection pool exhausted"),
        AcquireTimeout => Classification::new(Timeout, "Timed out acquiring a database connection"),
        StatementTimeout => Classification::new(Timeout, "Database operation timed out"),
        TransactionTimeout => Classification::new(Timeout, "Database transaction timed out"),

        SyntaxError | AccessDenied => {
            Classification::new(MalformedStatement, "Invalid query syntax or access denied")
        }
        DataError => Classification::new(MalformedStatement, "Invalid data format"),
        InvalidStatement => Classification::new(MalformedStatement, "Invalid database query"),

        Other(Some(code)) => Classification::new(Unclassified, format!("Database error: {code}")),
        Other(None) => Classification::new(Unclassified, "Database error occurred"),
    }
}

/// Errors that can be run through [`classify`].
pub trait Classify {
    fn classification(&self) -> Classification;

    fn is_retryable(&self) -> bool {
        self.classification().retryable
    }
}

impl Classify for DriverErrorKind {
    fn classification(&self) -> Classification {
        classify(self)
    }
}

impl Classify for DriverError {
    fn classification(&self) -> Classification {
        classify(&self.kind)
    }
}

impl Classify for DatabaseError {
    fn classification(&self) -> Classification {
        match self {
            DatabaseError::Driver(e) => classify(&e.kind),
            DatabaseError::NotInitialized => Classification::with_response(
                ErrorCategory::Unclassified,
                ResponseCategory::Unavailable,
                "Database manager is not initialized",
            ),
            _ => Classification::new(ErrorCategory::Unclassified, "An unexpected database error occurred"),
        }
    }
}

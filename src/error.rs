use thiserror::Error;

use crate::db::driver::{DriverError, DriverErrorKind};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database manager is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Session {session_id} is already closed")]
    SessionClosed { session_id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl DatabaseError {
    /// Driver-level kind behind this error, if it came from the driver or the pool.
    pub fn driver_kind(&self) -> Option<&DriverErrorKind> {
        match self {
            DatabaseError::Driver(e) => Some(&e.kind),
            _ => None,
        }
    }

    /// Stable label used when the error is recorded by the error tracker.
    pub fn label(&self) -> &str {
        match self {
            DatabaseError::NotInitialized => "NotInitialized",
            DatabaseError::Driver(e) => e.kind.as_str(),
            DatabaseError::SessionClosed { .. } => "SessionClosed",
            DatabaseError::Configuration(_) => "Configuration",
            DatabaseError::Serialization(_) => "Serialization",
            DatabaseError::Metrics(_) => "Metrics",
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_is_transparent() {
        let err: DatabaseError =
            DriverError::new(DriverErrorKind::ConnectionLost, "server closed the connection").into();
        assert_eq!(err.to_string(), "ConnectionLost: server closed the connection");
        assert_eq!(err.label(), "ConnectionLost");
        assert_eq!(err.driver_kind(), Some(&DriverErrorKind::ConnectionLost));
    }

    #[test]
    fn test_non_driver_errors_have_no_kind() {
        let err = DatabaseError::NotInitialized;
        assert!(err.driver_kind().is_none());
        assert_eq!(err.label(), "NotInitialized");
    }
}

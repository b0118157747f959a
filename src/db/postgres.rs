//! PostgreSQL driver built on `sqlx`.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Connection, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::driver::{Driver, DriverConnection, DriverError, DriverErrorKind, StatementResult};
use super::statement::QueryType;
use crate::error::{DatabaseError, Result};

#[derive(Debug, Clone)]
pub struct PgDriver {
    options: PgConnectOptions,
}

impl PgDriver {
    /// Server-side `statement_timeout` is set slightly above the pool's client-side
    /// timeout so the client timeout fires first.
    pub fn new(database_url: &str, application_name: &str, statement_timeout: Duration) -> Result<Self> {
        let server_timeout_ms = statement_timeout.as_millis() + 1000;
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::Configuration(format!("Invalid database URL: {e}")))?
            .application_name(application_name)
            .options([("statement_timeout", format!("{server_timeout_ms}ms"))]);
        Ok(Self { options })
    }

    pub fn from_options(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn connect(&self) -> std::result::Result<Box<dyn DriverConnection>, DriverError> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(map_sqlx_error)?;
        debug!("Opened PostgreSQL connection");
        Ok(Box::new(PgDriverConnection { conn }))
    }

    fn name(&self) -> &str {
        "postgresql"
    }
}

struct PgDriverConnection {
    conn: PgConnection,
}

#[async_trait]
impl DriverConnection for PgDriverConnection {
    async fn execute(&mut self, sql: &str) -> std::result::Result<StatementResult, DriverError> {
        let conn: &mut PgConnection = &mut self.conn;
        if returns_rows(sql) {
            let rows = sqlx::query(sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;
            return Ok(StatementResult {
                rows_affected: rows.len() as u64,
                first_row: rows.first().map(render_row),
            });
        }

        let done = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql))
            .await
            .map_err(map_sqlx_error)?;
        Ok(StatementResult::affected(done.rows_affected()))
    }

    async fn ping(&mut self) -> std::result::Result<(), DriverError> {
        self.conn.ping().await.map_err(map_sqlx_error)
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DriverError> {
        self.conn.close().await.map_err(map_sqlx_error)
    }
}

fn returns_rows(sql: &str) -> bool {
    QueryType::from_sql(sql) == QueryType::Select || sql.to_ascii_uppercase().contains(" RETURNING ")
}

fn render_row(row: &PgRow) -> Vec<Option<String>> {
    (0..row.len()).map(|i| render_column(row, i)).collect()
}

fn render_column(row: &PgRow, index: usize) -> Option<String> {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map(|v| v.to_string());
    }
    None
}

/// Map a `sqlx` error onto a driver error kind.
pub fn map_sqlx_error(err: sqlx::Error) -> DriverError {
    let kind = match &err {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| kind_for_sqlstate(&code))
            .unwrap_or(DriverErrorKind::Other(None)),
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
            DriverErrorKind::ConnectionLost
        }
        sqlx::Error::Tls(_) | sqlx::Error::Configuration(_) | sqlx::Error::PoolClosed => {
            DriverErrorKind::ConnectionFailure
        }
        sqlx::Error::PoolTimedOut => DriverErrorKind::AcquireTimeout,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. } => DriverErrorKind::DataError,
        _ => DriverErrorKind::Other(None),
    };
    DriverError::new(kind, err.to_string())
}

/// PostgreSQL SQLSTATE to driver error kind.
pub fn kind_for_sqlstate(code: &str) -> DriverErrorKind {
    match code {
        "23505" => DriverErrorKind::UniqueViolation,
        "23503" => DriverErrorKind::ForeignKeyViolation,
        "23514" => DriverErrorKind::CheckViolation,
        "23502" => DriverErrorKind::NotNullViolation,
        "40P01" => DriverErrorKind::Deadlock,
        "40001" => DriverErrorKind::SerializationFailure,
        "57014" => DriverErrorKind::StatementTimeout,
        "57P01" | "57P02" | "57P03" => DriverErrorKind::ConnectionLost,
        "42501" => DriverErrorKind::AccessDenied,
        "42601" => DriverErrorKind::SyntaxError,
        "25P03" => DriverErrorKind::TransactionTimeout,
        c if c.starts_with("23") => DriverErrorKind::IntegrityError,
        c if c.starts_with("08") => DriverErrorKind::ConnectionFailure,
        c if c.starts_with("53") => DriverErrorKind::OperationalError,
        c if c.starts_with("42") => DriverErrorKind::InvalidStatement,
        c if c.starts_with("22") => DriverErrorKind::DataError,
        other => DriverErrorKind::Other(Some(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::Classify;

    #[test]
    fn test_sqlstate_mapping() {
        assert_eq!(kind_for_sqlstate("23505"), DriverErrorKind::UniqueViolation);
        assert_eq!(kind_for_sqlstate("23P01"), DriverErrorKind::IntegrityError);
        assert_eq!(kind_for_sqlstate("08006"), DriverErrorKind::ConnectionFailure);
        assert_eq!(kind_for_sqlstate("57P01"), DriverErrorKind::ConnectionLost);
        assert_eq!(kind_for_sqlstate("42P01"), DriverErrorKind::InvalidStatement);
        assert_eq!(kind_for_sqlstate("22P02"), DriverErrorKind::DataError);
        assert_eq!(
            kind_for_sqlstate("XX000"),
            DriverErrorKind::Other(Some("XX000".to_string()))
        );
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let mapped = map_sqlx_error(sqlx::Error::Io(io));
        assert_eq!(mapped.kind, DriverErrorKind::ConnectionLost);
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("insert into t (a) values (1) returning id"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("BEGIN"));
    }

    #[test]
    fn test_invalid_url_is_a_configuration_error() {
        let err = PgDriver::new("not a url", "poolwatch", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, DatabaseError::Configuration(_)));
    }

    #[tokio::test]
    #[ignore = "requires database connection"]
    async fn test_round_trip_against_postgres() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let driver = PgDriver::new(&url, "poolwatch-test", Duration::from_secs(5)).unwrap();
        let mut conn = driver.connect().await.unwrap();

        let result = conn.execute("SELECT 1::int8, 'x'::text, NULL::text").await.unwrap();
        let row = result.first_row.unwrap();
        assert_eq!(row[0].as_deref(), Some("1"));
        assert_eq!(row[1].as_deref(), Some("x"));
        assert_eq!(row[2], None);

        let err = conn.execute("SELEC 1").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::SyntaxError);
        conn.close().await.unwrap();
    }
}

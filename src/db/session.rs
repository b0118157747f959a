use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::driver::StatementResult;
use super::pool::PooledConnection;
use crate::error::{DatabaseError, Result};
use crate::monitoring::errors::{ErrorContext, ErrorTracker};
use crate::monitoring::metrics::{ConnectionEvent, MetricsCollector, QueryExecution};

/// A pooled connection that records every statement it runs.
///
/// Each statement produces a query record and a connection-use event; failures are
/// tracked as errors. The connection goes back to the pool when the session is closed or
/// dropped, and is discarded instead if a transaction is still open.
pub struct MonitoredSession {
    session_id: String,
    conn: Option<PooledConnection>,
    metrics: Arc<MetricsCollector>,
    errors: Arc<ErrorTracker>,
}

impl std::fmt::Debug for MonitoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredSession")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl MonitoredSession {
    pub(crate) fn new(
        conn: PooledConnection,
        metrics: Arc<MetricsCollector>,
        errors: Arc<ErrorTracker>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            conn: Some(conn),
            metrics,
            errors,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.conn.as_ref().map(PooledConnection::id)
    }

    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(PooledConnection::in_transaction)
    }

    pub async fn execute(&mut self, sql: &str) -> Result<StatementResult> {
        let conn = self.conn.as_mut().ok_or_else(|| DatabaseError::SessionClosed {
            session_id: self.session_id.clone(),
        })?;
        let connection_id = conn.id();

        let started = Instant::now();
        let outcome = conn.execute(sql).await;
        let elapsed = started.elapsed().as_secs_f64();

        let execution = QueryExecution::from_sql(sql, elapsed);
        let execution = match &outcome {
            Ok(result) => execution.rows_affected(result.rows_affected),
            Err(e) => execution.failed(e.to_string()),
        };
        let query_type = execution.query_type;
        let context = ErrorContext::new()
            .query_type(query_type)
            .table_name(execution.table_name.clone())
            .execution_time(elapsed)
            .connection_id(connection_id);

        self.metrics.record_query(execution);
        self.metrics.record_connection_event(
            connection_id,
            ConnectionEvent::Used {
                execution_time: elapsed,
                error: outcome.is_err(),
            },
        );

        if let Err(e) = &outcome {
            self.errors.track_driver_error(e, context.clone());
        }
        if self.metrics.is_slow(elapsed) {
            self.errors
                .track_performance_issue(query_type.as_str(), elapsed, context);
        }

        Ok(outcome?)
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN").await.map(|_| ())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// Roll back any open transaction and return the connection to the pool.
    pub async fn close(mut self) -> Result<()> {
        let rolled_back = if self.in_transaction() {
            self.rollback().await
        } else {
            Ok(())
        };
        if let Some(conn) = self.conn.take() {
            debug!("Session {} released connection {}", self.session_id, conn.id());
        }
        rolled_back
    }
}

impl Drop for MonitoredSession {
    fn drop(&mut self) {
        if let Some(conn) = &self.conn {
            if conn.in_transaction() {
                warn!(
                    "Session {} dropped with an open transaction, discarding connection {}",
                    self.session_id,
                    conn.id()
                );
            }
        }
    }
}

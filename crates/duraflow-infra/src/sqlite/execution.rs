//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `duraflow-core` using sqlx with split
//! read/write pools. Claims are single `UPDATE ... RETURNING` statements on
//! the writer pool, so the status check and the transition are atomic.

use chrono::{DateTime, SecondsFormat, Utc};
use duraflow_core::repository::{ClaimKind, ExecutionRepository, Finish};
use duraflow_types::error::RepositoryError;
use duraflow_types::execution::{Execution, ExecutionStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const COLUMNS: &str =
    "id, status, definition, params, state, queued_at, started_at, completed_at, wake_at, error";

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    status: String,
    definition: Vec<u8>,
    params: String,
    state: Option<String>,
    queued_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    wake_at: Option<String>,
    error: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            definition: row.try_get("definition")?,
            params: row.try_get("params")?,
            state: row.try_get("state")?,
            queued_at: row.try_get("queued_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            wake_at: row.try_get("wake_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status: ExecutionStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(Execution {
            id: parse_uuid(&self.id)?,
            status,
            definition: self.definition,
            params: self.params,
            state: self.state,
            queued_at: parse_datetime(&self.queued_at)?,
            started_at: parse_optional_datetime(self.started_at.as_deref())?,
            completed_at: parse_optional_datetime(self.completed_at.as_deref())?,
            wake_at: parse_optional_datetime(self.wake_at.as_deref())?,
            error: self.error,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// Fixed-width so that SQL string comparison orders chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn rows_to_executions(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Execution>, RepositoryError> {
    let mut executions = Vec::with_capacity(rows.len());
    for row in rows {
        let r = ExecutionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        executions.push(r.into_execution()?);
    }
    Ok(executions)
}

fn row_to_execution(
    row: Option<sqlx::sqlite::SqliteRow>,
) -> Result<Option<Execution>, RepositoryError> {
    match row {
        Some(row) => {
            let r = ExecutionRow::from_row(&row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(Some(r.into_execution()?))
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM executions WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row_to_execution(row)
    }

    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO executions
               (id, status, definition, params, state, queued_at, started_at, completed_at,
                wake_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   definition = excluded.definition,
                   params = excluded.params,
                   state = excluded.state,
                   queued_at = excluded.queued_at,
                   started_at = excluded.started_at,
                   completed_at = excluded.completed_at,
                   wake_at = excluded.wake_at,
                   error = excluded.error"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.definition)
        .bind(&execution.params)
        .bind(&execution.state)
        .bind(format_datetime(&execution.queued_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.wake_at.as_ref().map(format_datetime))
        .bind(&execution.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.id,
            status = %execution.status,
            "execution saved"
        );
        Ok(())
    }

    async fn save_progress(
        &self,
        id: &Uuid,
        state: &str,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE executions
               SET state = ?,
                   wake_at = CASE WHEN status = 'running' THEN ? ELSE NULL END
               WHERE id = ?"#,
        )
        .bind(state)
        .bind(wake_at.as_ref().map(format_datetime))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM executions WHERE status = ? ORDER BY queued_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_executions(&rows)
    }

    async fn find_runnable_by_wake_at_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM executions \
             WHERE status = 'running' AND wake_at IS NOT NULL AND wake_at <= ? \
             ORDER BY wake_at ASC, id ASC"
        ))
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_executions(&rows)
    }

    async fn claim(
        &self,
        id: &Uuid,
        kind: ClaimKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, RepositoryError> {
        let row = match kind {
            ClaimKind::Fresh => {
                sqlx::query(&format!(
                    "UPDATE executions SET status = 'running', started_at = ? \
                     WHERE id = ? AND status = 'queued' \
                     RETURNING {COLUMNS}"
                ))
                .bind(format_datetime(&now))
                .bind(id.to_string())
                .fetch_optional(&self.pool.writer)
                .await
            }
            ClaimKind::Resume => {
                sqlx::query(&format!(
                    "UPDATE executions SET wake_at = NULL \
                     WHERE id = ? AND status = 'running' AND wake_at IS NOT NULL AND wake_at <= ? \
                     RETURNING {COLUMNS}"
                ))
                .bind(id.to_string())
                .bind(format_datetime(&now))
                .fetch_optional(&self.pool.writer)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row_to_execution(row)
    }

    async fn finish(
        &self,
        id: &Uuid,
        finish: Finish<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE executions
               SET status = ?, completed_at = ?, wake_at = NULL, error = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(finish.status().as_str())
        .bind(format_datetime(&now))
        .bind(finish.error())
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE executions SET status = 'cancelled', wake_at = NULL \
             WHERE id = ? AND status IN ('queued', 'running') \
             RETURNING {COLUMNS}"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row_to_execution(row)
    }

    async fn list(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = match status {
            Some(s) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM executions WHERE status = ? \
                     ORDER BY queued_at DESC, id DESC LIMIT ?"
                ))
                .bind(s.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM executions ORDER BY queued_at DESC, id DESC LIMIT ?"
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_executions(&rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! In-memory execution repository.
//!
//! Backs tests and single-process embedding. Rows live in a `DashMap`; a
//! claim holds the row's shard lock for the whole check-and-set, so it is
//! atomic with respect to other claims of the same id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use duraflow_types::error::RepositoryError;
use duraflow_types::execution::{Execution, ExecutionStatus};
use uuid::Uuid;

use super::execution::{ClaimKind, ExecutionRepository, Finish};

#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    executions: DashMap<Uuid, Execution>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn save_progress(
        &self,
        id: &Uuid,
        state: &str,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.executions.get_mut(id) else {
            return Ok(false);
        };
        let execution = entry.value_mut();
        execution.state = Some(state.to_string());
        execution.wake_at = if execution.status == ExecutionStatus::Running {
            wake_at
        } else {
            None
        };
        Ok(true)
    }

    async fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut rows: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|e| (e.queued_at, e.id));
        Ok(rows)
    }

    async fn find_runnable_by_wake_at_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut rows: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|e| (e.wake_at, e.id));
        Ok(rows)
    }

    async fn claim(
        &self,
        id: &Uuid,
        kind: ClaimKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, RepositoryError> {
        let Some(mut entry) = self.executions.get_mut(id) else {
            return Ok(None);
        };
        let execution = entry.value_mut();
        match kind {
            ClaimKind::Fresh if execution.status == ExecutionStatus::Queued => {
                execution.status = ExecutionStatus::Running;
                execution.started_at = Some(now);
            }
            ClaimKind::Resume if execution.is_due(now) => {
                execution.wake_at = None;
            }
            _ => return Ok(None),
        }
        Ok(Some(execution.clone()))
    }

    async fn finish(
        &self,
        id: &Uuid,
        finish: Finish<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(mut entry) = self.executions.get_mut(id) else {
            return Ok(false);
        };
        let execution = entry.value_mut();
        if execution.status != ExecutionStatus::Running {
            return Ok(false);
        }
        execution.status = finish.status();
        execution.completed_at = Some(now);
        execution.wake_at = None;
        execution.error = finish.error().map(str::to_string);
        Ok(true)
    }

    async fn cancel(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let Some(mut entry) = self.executions.get_mut(id) else {
            return Ok(None);
        };
        let execution = entry.value_mut();
        if execution.status.is_terminal() {
            return Ok(None);
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.wake_at = None;
        Ok(Some(execution.clone()))
    }

    async fn list(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut rows: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

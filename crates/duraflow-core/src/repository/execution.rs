//! Execution repository trait definition.
//!
//! Defines the storage interface for durable executions. The infrastructure
//! layer (duraflow-infra) implements this trait with SQLite persistence;
//! `memory::InMemoryExecutionRepository` backs tests and embedded use.

use chrono::{DateTime, Utc};
use duraflow_types::error::RepositoryError;
use duraflow_types::execution::{Execution, ExecutionStatus};
use uuid::Uuid;

/// Which transition a scheduler claim performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    /// `Queued -> Running`, stamping `started_at`.
    Fresh,
    /// Parked and due: clears `wake_at`, status stays `Running`.
    Resume,
}

/// Terminal transition written by the scheduler when an attempt ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish<'a> {
    Completed,
    Failed(&'a str),
}

impl Finish<'_> {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Finish::Completed => ExecutionStatus::Completed,
            Finish::Failed(_) => ExecutionStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Finish::Completed => None,
            Finish::Failed(error) => Some(*error),
        }
    }
}

/// Repository trait for execution persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    /// Get an execution by its UUID.
    fn find_by_id(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Upsert the full execution row (insert or replace by ID).
    fn save(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Write only the step history and wake-up instant of a row.
    ///
    /// `wake_at` is stored only while the row is `Running`; any other status
    /// clears it. Status and lifecycle timestamps are never touched, so a
    /// concurrent cancel is not overwritten. Returns `false` if the row does
    /// not exist.
    fn save_progress(
        &self,
        id: &Uuid,
        state: &str,
        wake_at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All executions with the given status, oldest `queued_at` first.
    fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Running executions whose `wake_at` is at or before `now`, earliest first.
    fn find_runnable_by_wake_at_before(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Atomically perform the `kind` transition if the row still qualifies.
    ///
    /// Returns the claimed row, or `None` when another actor got there first
    /// (or the row no longer matches). Two concurrent claims of the same row
    /// never both succeed.
    fn claim(
        &self,
        id: &Uuid,
        kind: ClaimKind,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Atomically move a `Running` row to its terminal status.
    ///
    /// Stamps `completed_at = now`, clears `wake_at` and stores the error
    /// for `Finish::Failed`. Returns `false` without writing when the row is
    /// missing or no longer `Running` (a concurrent cancel wins).
    fn finish(
        &self,
        id: &Uuid,
        finish: Finish<'_>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Atomically move a `Queued` or `Running` row to `Cancelled`.
    ///
    /// Clears `wake_at` and leaves `state` and `completed_at` untouched.
    /// Returns the updated row, or `None` when the row is missing or already
    /// terminal.
    fn cancel(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Most recently queued executions, optionally filtered by status.
    fn list(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;
}

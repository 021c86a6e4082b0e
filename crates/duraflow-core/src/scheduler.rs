//! Polling scheduler.
//!
//! Each tick fetches queued executions and parked executions whose timer is
//! due, claims each one atomically, and runs a replay attempt. The outcome
//! of an attempt decides the row's next state:
//!
//! - returned a value: `Completed`
//! - suspended on a timer: left `Running` with `wake_at` set by the context
//! - cancelled: left as is
//! - any other error, or a panic in the handler: `Failed`, with the message
//!   stored
//!
//! Terminal writes are conditional on the row still being `Running`, so a
//! concurrent cancel is never overwritten.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use duraflow_types::config::EngineConfig;
use duraflow_types::definition::WorkflowDefinition;
use duraflow_types::error::RepositoryError;
use duraflow_types::execution::{Execution, ExecutionStatus};
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::{Codec, TypedValue};
use crate::context::{ExecutionStore, ReplayContext};
use crate::error::WorkflowError;
use crate::invocation::{ServiceInstanceProvider, invoke_workflow};
use crate::repository::{ClaimKind, ExecutionRepository, Finish};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The workflow body failed; the execution was marked `Failed`.
    #[error("execution {execution_id} failed: {source}")]
    WorkflowFailed {
        execution_id: Uuid,
        #[source]
        source: WorkflowError,
    },

    #[error("scheduler repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// An attempt task panicked or was aborted.
    #[error("attempt task failed: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What one attempt did to its execution.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed(TypedValue),
    Suspended { wake_at: DateTime<Utc> },
    Canceled,
    /// The claim lost to another actor; nothing ran.
    Skipped,
}

/// Summary of one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub suspended: usize,
    pub canceled: usize,
    pub skipped: usize,
    pub failures: Vec<SchedulerError>,
}

impl TickReport {
    /// Number of executions the tick looked at.
    pub fn attempted(&self) -> usize {
        self.claimed + self.skipped
    }

    pub fn is_idle(&self) -> bool {
        self.attempted() == 0 && self.failures.is_empty()
    }

    fn record(&mut self, result: Result<AttemptOutcome, SchedulerError>) {
        match result {
            Ok(AttemptOutcome::Skipped) => self.skipped += 1,
            Ok(outcome) => {
                self.claimed += 1;
                match outcome {
                    AttemptOutcome::Completed(_) => self.completed += 1,
                    AttemptOutcome::Suspended { .. } => self.suspended += 1,
                    AttemptOutcome::Canceled => self.canceled += 1,
                    AttemptOutcome::Skipped => {}
                }
            }
            Err(err) => {
                if matches!(err, SchedulerError::WorkflowFailed { .. }) {
                    self.claimed += 1;
                }
                self.failures.push(err);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives executions forward by polling the repository.
pub struct Scheduler<R> {
    repo: Arc<R>,
    provider: Arc<dyn ServiceInstanceProvider>,
    codec: Arc<Codec>,
    config: EngineConfig,
}

impl<R> Clone for Scheduler<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            provider: self.provider.clone(),
            codec: self.codec.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R: ExecutionRepository + 'static> Scheduler<R> {
    pub fn new(
        repo: Arc<R>,
        provider: Arc<dyn ServiceInstanceProvider>,
        codec: Arc<Codec>,
    ) -> Self {
        Self {
            repo,
            provider,
            codec,
            config: EngineConfig::default(),
        }
    }

    /// Use the poll interval and concurrency limit from `config`.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Poll until `shutdown` is cancelled, one tick per poll interval.
    ///
    /// A tick in progress always finishes before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        let interval = self.config.poll_interval();
        tracing::info!(
            poll_interval_ms = interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent_attempts,
            "scheduler started"
        );

        loop {
            match self.tick().await {
                Ok(report) if !report.is_idle() => tracing::debug!(
                    claimed = report.claimed,
                    completed = report.completed,
                    suspended = report.suspended,
                    canceled = report.canceled,
                    skipped = report.skipped,
                    failed = report.failures.len(),
                    "tick finished"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "tick failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("scheduler stopped");
    }

    /// One scheduling pass over queued and due executions.
    ///
    /// Only a failure to list candidates is returned as `Err`; per-execution
    /// failures are collected in the report.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let now = Utc::now();
        let queued = self.repo.find_by_status(ExecutionStatus::Queued).await?;
        let due = self.repo.find_runnable_by_wake_at_before(now).await?;

        let mut seen = HashSet::new();
        let work: Vec<(Uuid, ClaimKind)> = queued
            .iter()
            .map(|e| (e.id, ClaimKind::Fresh))
            .chain(due.iter().map(|e| (e.id, ClaimKind::Resume)))
            .filter(|(id, _)| seen.insert(*id))
            .collect();

        let mut report = TickReport::default();
        let limit = self.config.max_concurrent_attempts.max(1);

        if limit == 1 {
            for (id, kind) in work {
                report.record(self.attempt(id, kind).await);
            }
            return Ok(report);
        }

        let mut join_set = JoinSet::new();
        for (id, kind) in work {
            while join_set.len() >= limit {
                if let Some(joined) = join_set.join_next().await {
                    report.record(flatten(joined));
                }
            }
            let this = self.clone();
            join_set.spawn(async move { this.attempt(id, kind).await });
        }
        while let Some(joined) = join_set.join_next().await {
            report.record(flatten(joined));
        }

        Ok(report)
    }

    /// Claim and run a single execution.
    pub async fn attempt(
        &self,
        id: Uuid,
        kind: ClaimKind,
    ) -> Result<AttemptOutcome, SchedulerError> {
        let Some(execution) = self.repo.claim(&id, kind, Utc::now()).await? else {
            tracing::warn!(execution_id = %id, ?kind, "claim lost, skipping");
            return Ok(AttemptOutcome::Skipped);
        };

        tracing::info!(
            execution_id = %id,
            resume = kind == ClaimKind::Resume,
            "executing workflow"
        );

        let result = AssertUnwindSafe(self.drive(&execution))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(WorkflowError::failed(format!(
                    "workflow panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match result {
            Ok(value) => self.complete(id, value).await,
            Err(WorkflowError::Suspended { wake_at }) => {
                tracing::info!(execution_id = %id, %wake_at, "workflow suspended");
                Ok(AttemptOutcome::Suspended { wake_at })
            }
            Err(WorkflowError::Canceled) => {
                tracing::info!(execution_id = %id, "workflow cancelled");
                Ok(AttemptOutcome::Canceled)
            }
            Err(err) => {
                tracing::error!(execution_id = %id, error = %err, "workflow execution failed");
                if self.fail(id, &err).await? {
                    Err(SchedulerError::WorkflowFailed {
                        execution_id: id,
                        source: err,
                    })
                } else {
                    Ok(AttemptOutcome::Canceled)
                }
            }
        }
    }

    async fn drive(&self, execution: &Execution) -> Result<TypedValue, WorkflowError> {
        let definition = WorkflowDefinition::from_bytes(&execution.definition)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?;
        let store: Arc<dyn ExecutionStore> = self.repo.clone();
        let mut ctx = ReplayContext::load(execution.id, store, self.codec.clone()).await?;
        invoke_workflow(self.provider.as_ref(), &self.codec, &definition, &mut ctx).await
    }

    async fn complete(
        &self,
        id: Uuid,
        value: TypedValue,
    ) -> Result<AttemptOutcome, SchedulerError> {
        if !self.repo.finish(&id, Finish::Completed, Utc::now()).await? {
            tracing::info!(execution_id = %id, "cancelled while running, keeping cancelled");
            return Ok(AttemptOutcome::Canceled);
        }

        tracing::info!(execution_id = %id, result = %value, "workflow completed");
        Ok(AttemptOutcome::Completed(value))
    }

    /// Mark the execution failed. Returns `false` if it was cancelled instead.
    async fn fail(&self, id: Uuid, err: &WorkflowError) -> Result<bool, SchedulerError> {
        let message = err.to_string();
        let failed = self
            .repo
            .finish(&id, Finish::Failed(&message), Utc::now())
            .await?;
        Ok(failed)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn flatten(
    joined: Result<Result<AttemptOutcome, SchedulerError>, tokio::task::JoinError>,
) -> Result<AttemptOutcome, SchedulerError> {
    joined.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "attempt task did not finish");
        Err(SchedulerError::Join(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use duraflow_types::definition::{ServiceIdentifier, WorkflowParameter};
    use futures_util::future::BoxFuture;

    use crate::invocation::{Arguments, HandlerRegistry};
    use crate::repository::InMemoryExecutionRepository;

    fn echo(
        ctx: &mut ReplayContext,
        mut args: Arguments,
    ) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
        Box::pin(async move {
            let text: String = args.next()?;
            let out: String = ctx.action("echo", || async move { Ok(text) }).await?;
            Ok(TypedValue::String(out))
        })
    }

    fn explode(
        _ctx: &mut ReplayContext,
        _args: Arguments,
    ) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
        Box::pin(async { Err(WorkflowError::failed("kaboom")) })
    }

    fn panics(
        _ctx: &mut ReplayContext,
        _args: Arguments,
    ) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
        Box::pin(async {
            let empty: Vec<i64> = Vec::new();
            Ok(TypedValue::I64(empty[3]))
        })
    }

    fn nap(
        ctx: &mut ReplayContext,
        _args: Arguments,
    ) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
        Box::pin(async move {
            ctx.sleep(Duration::from_secs(3600)).await?;
            Ok(TypedValue::Null)
        })
    }

    fn submit(method: &str, params: Vec<WorkflowParameter>) -> Execution {
        let def = WorkflowDefinition {
            service_identifier: ServiceIdentifier::new("test"),
            method_name: method.to_string(),
            parameters: params,
        };
        Execution::queued(def.to_bytes().unwrap(), def.params_json().unwrap())
    }

    fn scheduler(
        repo: &Arc<InMemoryExecutionRepository>,
    ) -> Scheduler<InMemoryExecutionRepository> {
        let mut registry = HandlerRegistry::new();
        registry
            .register("test", "echo", echo)
            .register("test", "explode", explode)
            .register("test", "nap", nap)
            .register("test", "panics", panics);
        Scheduler::new(repo.clone(), Arc::new(registry), Arc::new(Codec::new()))
    }

    fn text_param(v: &str) -> WorkflowParameter {
        WorkflowParameter {
            name: "text".to_string(),
            type_tag: Some("string".to_string()),
            value: Some(format!("\"{v}\"")),
        }
    }

    #[tokio::test]
    async fn tick_completes_queued_execution() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let exec = submit("echo", vec![WorkflowParameter::context("ctx"), text_param("hi")]);
        repo.save(&exec).await.unwrap();

        let report = scheduler(&repo).tick().await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(report.failures.is_empty());

        let done = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(done.wake_at.is_none());
    }

    #[tokio::test]
    async fn failure_is_recorded_on_the_row() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let exec = submit("explode", vec![]);
        repo.save(&exec).await.unwrap();

        let report = scheduler(&repo).tick().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.claimed, 1);

        let failed = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert!(failed.error.as_deref().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn unknown_method_fails_the_execution() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let exec = submit("missing", vec![]);
        repo.save(&exec).await.unwrap();

        scheduler(&repo).tick().await.unwrap();
        let failed = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn suspended_execution_is_not_resumed_early() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let exec = submit("nap", vec![WorkflowParameter::context("ctx")]);
        repo.save(&exec).await.unwrap();
        let sched = scheduler(&repo);

        let report = sched.tick().await.unwrap();
        assert_eq!(report.suspended, 1);

        let parked = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(parked.status, ExecutionStatus::Running);
        assert!(parked.wake_at.is_some());

        let report = sched.tick().await.unwrap();
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn cancelled_rows_are_never_picked_up() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let mut exec = submit("echo", vec![text_param("x")]);
        exec.status = ExecutionStatus::Cancelled;
        repo.save(&exec).await.unwrap();

        let report = scheduler(&repo).tick().await.unwrap();
        assert!(report.is_idle());
        let row = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(row.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_tick_runs_each_execution_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        fn count(
            ctx: &mut ReplayContext,
            _args: Arguments,
        ) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
            Box::pin(async move {
                let n: i64 = ctx
                    .action("count", || async {
                        Ok(CALLS.fetch_add(1, Ordering::SeqCst) as i64)
                    })
                    .await?;
                Ok(TypedValue::I64(n))
            })
        }

        let repo = Arc::new(InMemoryExecutionRepository::new());
        for _ in 0..6 {
            repo.save(&submit("count", vec![WorkflowParameter::context("ctx")]))
                .await
                .unwrap();
        }
        let mut registry = HandlerRegistry::new();
        registry.register("test", "count", count);
        let config = EngineConfig {
            max_concurrent_attempts: 3,
            ..Default::default()
        };
        let sched = Scheduler::new(repo.clone(), Arc::new(registry), Arc::new(Codec::new()))
            .with_config(config);

        let report = sched.tick().await.unwrap();
        assert_eq!(report.completed, 6);
        assert_eq!(CALLS.load(Ordering::SeqCst), 6);
        assert_eq!(
            repo.find_by_status(ExecutionStatus::Completed).await.unwrap().len(),
            6
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let exec = submit("echo", vec![text_param("loop")]);
        repo.save(&exec).await.unwrap();

        let sched = scheduler(&repo).with_config(EngineConfig {
            poll_interval_ms: 10,
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let handle = {
            let sched = sched.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { sched.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let done = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
    }

    async fn panic_is_contained(limit: usize) {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let bad = submit("panics", vec![]);
        repo.save(&bad).await.unwrap();
        let good = submit("echo", vec![WorkflowParameter::context("ctx"), text_param("ok")]);
        repo.save(&good).await.unwrap();
        let sched = scheduler(&repo).with_config(EngineConfig {
            max_concurrent_attempts: limit,
            ..Default::default()
        });

        let report = sched.tick().await.unwrap();
        assert_eq!(report.completed, 1, "limit {limit}");
        assert_eq!(report.failures.len(), 1, "limit {limit}");
        assert!(matches!(
            report.failures[0],
            SchedulerError::WorkflowFailed { execution_id, .. } if execution_id == bad.id
        ));

        let failed = repo.find_by_id(&bad.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert!(failed.wake_at.is_none());
        assert!(failed.error.as_deref().unwrap().contains("panicked"));

        let done = repo.find_by_id(&good.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);

        assert!(sched.tick().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn panicking_handler_fails_only_its_execution() {
        panic_is_contained(1).await;
    }

    #[tokio::test]
    async fn panicking_handler_fails_only_its_execution_in_parallel() {
        panic_is_contained(3).await;
    }

    #[tokio::test]
    async fn late_completion_keeps_a_cancelled_row() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let exec = submit("echo", vec![text_param("x")]);
        repo.save(&exec).await.unwrap();
        let sched = scheduler(&repo);
        sched
            .repo
            .claim(&exec.id, ClaimKind::Fresh, Utc::now())
            .await
            .unwrap()
            .unwrap();
        repo.cancel(&exec.id).await.unwrap().unwrap();

        let outcome = sched.complete(exec.id, TypedValue::Null).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Canceled);
        assert!(!sched.fail(exec.id, &WorkflowError::failed("late")).await.unwrap());

        let row = repo.find_by_id(&exec.id).await.unwrap().unwrap();
        assert_eq!(row.status, ExecutionStatus::Cancelled);
        assert!(row.completed_at.is_none());
        assert!(row.error.is_none());
    }
}

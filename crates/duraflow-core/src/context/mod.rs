//! Replay context.
//!
//! A `ReplayContext` is handed to the workflow body on every attempt. It
//! turns the body's step calls into memoized, persisted actions: a step that
//! already completed in an earlier attempt returns its stored result without
//! running again, and a timer that is not yet due parks the execution by
//! unwinding with `WorkflowError::Suspended`.

mod path;
mod store;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use duraflow_types::execution::{Execution, ExecutionStatus};
use duraflow_types::flow::{Action, Flow, NULL_RESULT};
use futures_util::future::BoxFuture;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::codec::{Codec, Durable};
use crate::error::WorkflowError;

pub use path::ActionPath;
pub use store::ExecutionStore;

/// How a persist call changes the execution's `wake_at`.
#[derive(Debug, Clone, Copy)]
enum TimerUpdate {
    Keep,
    Clear,
    Park(DateTime<Utc>),
}

/// Per-attempt handle through which a workflow body issues durable steps.
pub struct ReplayContext {
    execution_id: Uuid,
    store: Arc<dyn ExecutionStore>,
    codec: Arc<Codec>,
    flow: Flow,
    path: ActionPath,
}

impl fmt::Debug for ReplayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayContext")
            .field("execution_id", &self.execution_id)
            .field("actions", &self.flow.actions.len())
            .field("depth", &self.path.depth())
            .finish()
    }
}

impl ReplayContext {
    /// Build the context for one attempt, loading the stored step history.
    ///
    /// A row without state (or no row at all) starts from an empty flow.
    pub async fn load(
        execution_id: Uuid,
        store: Arc<dyn ExecutionStore>,
        codec: Arc<Codec>,
    ) -> Result<Self, WorkflowError> {
        let flow = match store.load(&execution_id).await? {
            Some(Execution {
                state: Some(state), ..
            }) => {
                let mut flow = Flow::from_json(&state).map_err(|e| {
                    WorkflowError::State(format!("execution {execution_id}: {e}"))
                })?;
                if flow.id.is_empty() {
                    flow.id = execution_id.to_string();
                }
                flow
            }
            _ => Flow::new(execution_id.to_string()),
        };
        debug!(
            execution_id = %execution_id,
            recorded = flow.actions.len(),
            completed = flow.completed_count(),
            "replay context loaded"
        );
        Ok(Self {
            execution_id,
            store,
            codec,
            flow,
            path: ActionPath::new(),
        })
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// The in-memory step history as of now.
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    // -----------------------------------------------------------------------
    // Addressing
    // -----------------------------------------------------------------------

    /// Take the next positional id in the current scope.
    ///
    /// `name` is diagnostic only; it does not affect the id.
    pub fn generate_action_id(&mut self, name: &str) -> String {
        let id = self.path.next_id();
        trace!(
            execution_id = %self.execution_id,
            action_id = %id,
            action_name = name,
            "action id assigned"
        );
        id
    }

    /// Open a child scope so nested steps are addressed under `id`.
    pub fn enter_action(&mut self, id: &str) {
        self.path.enter(id);
    }

    /// Close the innermost child scope.
    pub fn exit_action(&mut self) {
        self.path.exit();
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Run `block` at most once across all attempts of this execution.
    ///
    /// On replay the stored result is decoded and returned instead. Errors
    /// from `block` are not recorded; the step runs again next attempt.
    pub async fn action<T, F, Fut>(&mut self, name: &str, block: F) -> Result<T, WorkflowError>
    where
        T: Durable,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, WorkflowError>> + Send,
    {
        self.ensure_not_cancelled().await?;
        let id = self.generate_action_id(name);
        if let Some(value) = self.replayed::<T>(&id, name)? {
            return Ok(value);
        }

        self.enter_action(&id);
        let outcome = block().await;
        self.exit_action();

        let value = outcome?;
        self.memoize(id, name, &value)?;
        self.persist(TimerUpdate::Keep).await?;
        Ok(value)
    }

    /// Like [`action`](Self::action), but `block` receives the context so it
    /// can issue nested steps (ids `"<parent>.0"`, `"<parent>.1"`, ...).
    pub async fn action_scoped<T, F>(&mut self, name: &str, block: F) -> Result<T, WorkflowError>
    where
        T: Durable,
        F: for<'c> FnOnce(&'c mut ReplayContext) -> BoxFuture<'c, Result<T, WorkflowError>> + Send,
    {
        self.ensure_not_cancelled().await?;
        let id = self.generate_action_id(name);
        if let Some(value) = self.replayed::<T>(&id, name)? {
            return Ok(value);
        }

        self.enter_action(&id);
        let outcome = block(&mut *self).await;
        self.exit_action();

        let value = outcome?;
        self.memoize(id, name, &value)?;
        self.persist(TimerUpdate::Keep).await?;
        Ok(value)
    }

    /// Durable sleep relative to the first time this step is reached.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), WorkflowError> {
        let delta = TimeDelta::from_std(duration).map_err(|e| {
            WorkflowError::InvalidArguments(format!("sleep duration out of range: {e}"))
        })?;
        self.wait_for_timer("sleep", |now| now.checked_add_signed(delta))
            .await
    }

    /// Durable sleep until an absolute instant.
    pub async fn sleep_until(&mut self, wake_at: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.wait_for_timer("sleep_until", |_| Some(wake_at)).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn wait_for_timer<D>(&mut self, name: &str, deadline: D) -> Result<(), WorkflowError>
    where
        D: FnOnce(DateTime<Utc>) -> Option<DateTime<Utc>> + Send,
    {
        self.ensure_not_cancelled().await?;
        let id = self.generate_action_id(name);
        let now = Utc::now();

        let pending = match self.flow.find(&id) {
            Some(action) if action.completed => {
                debug!(
                    execution_id = %self.execution_id,
                    action_id = %id,
                    "timer already elapsed"
                );
                return Ok(());
            }
            Some(action) => action.wake_at,
            None => None,
        };

        match pending {
            Some(wake_at) if wake_at <= now => {
                let mut done = Action::new(id.clone());
                done.name = Some(name.to_string());
                done.result = Some(NULL_RESULT.to_string());
                done.completed = true;
                self.flow.upsert(done);
                self.persist(TimerUpdate::Clear).await?;
                debug!(
                    execution_id = %self.execution_id,
                    action_id = %id,
                    %wake_at,
                    "timer elapsed"
                );
                Ok(())
            }
            Some(wake_at) => self.park(id, name, wake_at).await,
            None => {
                // Microsecond precision matches what storage round-trips.
                let wake_at = deadline(now)
                    .map(|at| at.trunc_subsecs(6))
                    .ok_or_else(|| {
                        WorkflowError::InvalidArguments("sleep deadline out of range".to_string())
                    })?;
                self.park(id, name, wake_at).await
            }
        }
    }

    async fn park(
        &mut self,
        id: String,
        name: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let mut pending = Action::new(id.clone());
        pending.name = Some(name.to_string());
        pending.wake_at = Some(wake_at);
        self.flow.upsert(pending);
        self.persist(TimerUpdate::Park(wake_at)).await?;

        info!(
            execution_id = %self.execution_id,
            action_id = %id,
            %wake_at,
            "workflow parked on timer"
        );
        Err(WorkflowError::Suspended { wake_at })
    }

    fn replayed<T: Durable>(&self, id: &str, name: &str) -> Result<Option<T>, WorkflowError> {
        match self.flow.find(id) {
            Some(action) if action.completed => {
                let value = self
                    .codec
                    .decode(action.result_type.as_deref(), action.result.as_deref())?;
                debug!(
                    execution_id = %self.execution_id,
                    action_id = %id,
                    action_name = name,
                    "replaying memoized action"
                );
                Ok(Some(T::from_typed(value)?))
            }
            _ => Ok(None),
        }
    }

    fn memoize<T: Durable>(
        &mut self,
        id: String,
        name: &str,
        value: &T,
    ) -> Result<(), WorkflowError> {
        let encoded = self.codec.encode(&value.to_typed()?)?;
        debug!(
            execution_id = %self.execution_id,
            action_id = %id,
            action_name = name,
            result_type = ?encoded.tag,
            "action completed"
        );
        self.flow.upsert(Action {
            id,
            name: Some(name.to_string()),
            result: Some(encoded.text),
            result_type: encoded.tag,
            completed: true,
            wake_at: None,
        });
        Ok(())
    }

    async fn ensure_not_cancelled(&self) -> Result<(), WorkflowError> {
        match self.store.load(&self.execution_id).await? {
            Some(execution) if execution.status == ExecutionStatus::Cancelled => {
                info!(execution_id = %self.execution_id, "cancellation observed, unwinding");
                Err(WorkflowError::Canceled)
            }
            _ => Ok(()),
        }
    }

    /// Write the flow (and timer change) back to the execution row.
    async fn persist(&self, timer: TimerUpdate) -> Result<(), WorkflowError> {
        let current = self
            .store
            .load(&self.execution_id)
            .await?
            .ok_or(WorkflowError::ExecutionNotFound(self.execution_id))?;

        let wake_at = match timer {
            TimerUpdate::Keep => current.wake_at,
            TimerUpdate::Clear => None,
            TimerUpdate::Park(at) => {
                let now = Utc::now();
                match current.wake_at {
                    Some(existing) if existing > now && existing < at => Some(existing),
                    _ => Some(at),
                }
            }
        };

        let state = self
            .flow
            .to_json()
            .map_err(|e| WorkflowError::State(e.to_string()))?;
        let found = self
            .store
            .store_progress(&self.execution_id, &state, wake_at)
            .await?;
        if !found {
            return Err(WorkflowError::ExecutionNotFound(self.execution_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::repository::{ExecutionRepository, InMemoryExecutionRepository};

    async fn running_execution(repo: &InMemoryExecutionRepository) -> Uuid {
        let mut exec = Execution::queued(b"{}".to_vec(), "[]".to_string());
        exec.status = ExecutionStatus::Running;
        exec.started_at = Some(Utc::now());
        repo.save(&exec).await.unwrap();
        exec.id
    }

    async fn context(repo: &Arc<InMemoryExecutionRepository>, id: Uuid) -> ReplayContext {
        let store: Arc<dyn ExecutionStore> = repo.clone();
        ReplayContext::load(id, store, Arc::new(Codec::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ids_follow_call_position() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let mut ctx = context(&repo, id).await;

        assert_eq!(ctx.generate_action_id("a"), "0");
        let parent = ctx.generate_action_id("b");
        ctx.enter_action(&parent);
        assert_eq!(ctx.generate_action_id("c"), "1.0");
        assert_eq!(ctx.generate_action_id("d"), "1.1");
        ctx.exit_action();
        assert_eq!(ctx.generate_action_id("e"), "2");
    }

    #[tokio::test]
    async fn completed_action_is_not_run_again() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let mut ctx = context(&repo, id).await;
            let counter = calls.clone();
            let value: String = ctx
                .action("fetch", || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("payload".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "payload");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stored = repo.find_by_id(&id).await.unwrap().unwrap();
        let flow = Flow::from_json(stored.state.as_deref().unwrap()).unwrap();
        let action = flow.find("0").unwrap();
        assert!(action.completed);
        assert_eq!(action.result.as_deref(), Some("\"payload\""));
        assert_eq!(action.result_type.as_deref(), Some("string"));
    }

    #[tokio::test]
    async fn null_result_is_stored_without_type() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let mut ctx = context(&repo, id).await;

        let value: Option<i32> = ctx.action("noop", || async { Ok(None) }).await.unwrap();
        assert!(value.is_none());

        let action = ctx.flow().find("0").unwrap();
        assert_eq!(action.result.as_deref(), Some("null"));
        assert!(action.result_type.is_none());
    }

    #[tokio::test]
    async fn failed_action_is_not_memoized() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let mut ctx = context(&repo, id).await;

        let res: Result<i32, _> = ctx
            .action("explode", || async { Err(WorkflowError::failed("boom")) })
            .await;
        assert!(matches!(res, Err(WorkflowError::Failed(_))));
        assert!(ctx.flow().find("0").is_none());
    }

    #[tokio::test]
    async fn nested_actions_are_addressed_under_parent() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let mut ctx = context(&repo, id).await;

        let total: i64 = ctx
            .action_scoped("outer", |ctx| {
                Box::pin(async move {
                    let a: i64 = ctx.action("a", || async { Ok(2i64) }).await?;
                    let b: i64 = ctx.action("b", || async { Ok(3i64) }).await?;
                    Ok(a + b)
                })
            })
            .await
            .unwrap();
        assert_eq!(total, 5);

        let flow = ctx.flow();
        assert!(flow.find("0.0").unwrap().completed);
        assert!(flow.find("0.1").unwrap().completed);
        assert_eq!(flow.find("0").unwrap().result.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn sleep_parks_then_elapses() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;

        let mut ctx = context(&repo, id).await;
        let err = ctx.sleep(Duration::from_millis(500)).await.unwrap_err();
        let WorkflowError::Suspended { wake_at } = err else {
            panic!("expected suspension, got {err:?}");
        };

        let parked = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(parked.wake_at, Some(wake_at));
        assert_eq!(parked.status, ExecutionStatus::Running);

        // Not yet due: same wake instant, still suspended.
        let mut ctx = context(&repo, id).await;
        match ctx.sleep(Duration::from_secs(3600)).await {
            Err(WorkflowError::Suspended { wake_at: again }) => assert_eq!(again, wake_at),
            other => panic!("expected suspension, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(600)).await;
        let mut ctx = context(&repo, id).await;
        ctx.sleep(Duration::from_millis(500)).await.unwrap();

        let stored = repo.find_by_id(&id).await.unwrap().unwrap();
        assert!(stored.wake_at.is_none());
        let flow = Flow::from_json(stored.state.as_deref().unwrap()).unwrap();
        let timer = flow.find("0").unwrap();
        assert!(timer.completed);
        assert!(timer.wake_at.is_none());
        assert_eq!(timer.result.as_deref(), Some("null"));
    }

    #[tokio::test]
    async fn sleep_until_past_instant_elapses_on_next_pass() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let past = Utc::now() - TimeDelta::seconds(5);

        let mut ctx = context(&repo, id).await;
        assert!(matches!(
            ctx.sleep_until(past).await,
            Err(WorkflowError::Suspended { .. })
        ));

        let mut ctx = context(&repo, id).await;
        ctx.sleep_until(past).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_execution_unwinds_before_next_step() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let id = running_execution(&repo).await;
        let mut ctx = context(&repo, id).await;

        let mut exec = repo.find_by_id(&id).await.unwrap().unwrap();
        exec.status = ExecutionStatus::Cancelled;
        repo.save(&exec).await.unwrap();

        let res: Result<i32, _> = ctx.action("never", || async { Ok(1) }).await;
        assert!(matches!(res, Err(WorkflowError::Canceled)));
        assert!(matches!(
            ctx.sleep(Duration::from_secs(1)).await,
            Err(WorkflowError::Canceled)
        ));
    }

    #[tokio::test]
    async fn corrupt_state_is_reported() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let mut exec = Execution::queued(b"{}".to_vec(), "[]".to_string());
        exec.state = Some("not json".to_string());
        repo.save(&exec).await.unwrap();

        let store: Arc<dyn ExecutionStore> = repo.clone();
        let err = ReplayContext::load(exec.id, store, Arc::new(Codec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::State(_)));
    }
}

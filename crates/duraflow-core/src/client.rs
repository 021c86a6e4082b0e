//! Submission and control surface.
//!
//! `WorkflowClient` persists new executions and manages existing ones;
//! `DefinitionBuilder` assembles a portable `WorkflowDefinition` from plain
//! Rust values through the codec.

use std::sync::Arc;

use duraflow_types::definition::{
    ServiceIdentifier, WorkflowDefinition, WorkflowParameter,
};
use duraflow_types::error::RepositoryError;
use duraflow_types::execution::{Execution, ExecutionStatus};
use duraflow_types::flow::Flow;
use uuid::Uuid;

use crate::codec::{Codec, CodecError, Durable};
use crate::repository::ExecutionRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),

    /// The requested lifecycle change is not allowed from the current status.
    #[error("cannot {action} execution {id} in status {status}")]
    InvalidTransition {
        id: Uuid,
        action: &'static str,
        status: ExecutionStatus,
    },

    #[error("invalid definition: {0}")]
    Definition(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// DefinitionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for a `WorkflowDefinition`.
///
/// ```ignore
/// let def = DefinitionBuilder::new(&codec, "demo.greeter", "greet")
///     .context("ctx")
///     .arg("name", "Ada".to_string())?
///     .build();
/// ```
pub struct DefinitionBuilder<'c> {
    codec: &'c Codec,
    definition: WorkflowDefinition,
}

impl<'c> DefinitionBuilder<'c> {
    pub fn new(codec: &'c Codec, service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            codec,
            definition: WorkflowDefinition {
                service_identifier: ServiceIdentifier::new(service),
                method_name: method.into(),
                parameters: Vec::new(),
            },
        }
    }

    /// Append the context placeholder slot.
    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.definition
            .parameters
            .push(WorkflowParameter::context(name));
        self
    }

    /// Append an encoded argument.
    pub fn arg<T: Durable>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<Self, CodecError> {
        let encoded = self.codec.encode_value(&value)?;
        self.definition.parameters.push(WorkflowParameter {
            name: name.into(),
            type_tag: encoded.tag,
            value: Some(encoded.text),
        });
        Ok(self)
    }

    pub fn build(self) -> WorkflowDefinition {
        self.definition
    }
}

// ---------------------------------------------------------------------------
// WorkflowClient
// ---------------------------------------------------------------------------

pub struct WorkflowClient<R> {
    repo: Arc<R>,
}

impl<R> Clone for WorkflowClient<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<R: ExecutionRepository> WorkflowClient<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Persist a new `Queued` execution and return its id.
    pub async fn submit(&self, definition: &WorkflowDefinition) -> Result<Uuid, ClientError> {
        if definition.method_name.trim().is_empty()
            || definition.service_identifier.name.trim().is_empty()
        {
            return Err(ClientError::Definition(
                "service and method names must not be empty".to_string(),
            ));
        }
        let bytes = definition
            .to_bytes()
            .map_err(|e| ClientError::Definition(e.to_string()))?;
        let params = definition
            .params_json()
            .map_err(|e| ClientError::Definition(e.to_string()))?;

        let execution = Execution::queued(bytes, params);
        self.repo.save(&execution).await?;
        tracing::info!(
            execution_id = %execution.id,
            service = %definition.service_identifier,
            method = %definition.method_name,
            "workflow submitted"
        );
        Ok(execution.id)
    }

    /// Move a non-terminal execution to `Cancelled`.
    ///
    /// A running body observes the cancellation before its next step.
    pub async fn cancel(&self, id: &Uuid) -> Result<Execution, ClientError> {
        if let Some(execution) = self.repo.cancel(id).await? {
            tracing::info!(execution_id = %id, "workflow cancelled");
            return Ok(execution);
        }

        let current = self.status(id).await?;
        Err(ClientError::InvalidTransition {
            id: *id,
            action: "cancel",
            status: current.status,
        })
    }

    pub async fn status(&self, id: &Uuid) -> Result<Execution, ClientError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(ClientError::NotFound(*id))
    }

    /// The recorded step history (empty if nothing ran yet).
    pub async fn flow(&self, id: &Uuid) -> Result<Flow, ClientError> {
        let execution = self.status(id).await?;
        match execution.state {
            Some(state) => {
                Flow::from_json(&state).map_err(|e| ClientError::Definition(e.to_string()))
            }
            None => Ok(Flow::new(id.to_string())),
        }
    }

    pub async fn list(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, ClientError> {
        Ok(self.repo.list(status, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::Utc;

    use crate::repository::{ClaimKind, Finish, InMemoryExecutionRepository};

    fn client() -> WorkflowClient<InMemoryExecutionRepository> {
        WorkflowClient::new(Arc::new(InMemoryExecutionRepository::new()))
    }

    #[test]
    fn builder_encodes_arguments_in_order() {
        let codec = Codec::new();
        let def = DefinitionBuilder::new(&codec, "video", "process")
            .context("ctx")
            .arg("file", PathBuf::from("/tmp/a.mp4"))
            .unwrap()
            .arg("retries", 3i32)
            .unwrap()
            .build();

        assert_eq!(def.parameters.len(), 3);
        assert!(def.parameters[0].is_context());
        assert_eq!(def.parameters[1].type_tag.as_deref(), Some("path"));
        assert_eq!(def.parameters[1].value.as_deref(), Some("\"file:///tmp/a.mp4\""));
        assert_eq!(def.parameters[2].value.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn submit_persists_queued_row() {
        let client = client();
        let def = DefinitionBuilder::new(&Codec::new(), "svc", "run").build();
        let id = client.submit(&def).await.unwrap();

        let row = client.status(&id).await.unwrap();
        assert_eq!(row.status, ExecutionStatus::Queued);
        assert_eq!(WorkflowDefinition::from_bytes(&row.definition).unwrap(), def);
        assert_eq!(row.params, "[]");
        assert!(client.flow(&id).await.unwrap().actions.is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_blank_names() {
        let client = client();
        let def = DefinitionBuilder::new(&Codec::new(), "svc", " ").build();
        assert!(matches!(client.submit(&def).await, Err(ClientError::Definition(_))));
    }

    #[tokio::test]
    async fn cancel_is_rejected_for_terminal_rows() {
        let client = client();
        let def = DefinitionBuilder::new(&Codec::new(), "svc", "run").build();
        let id = client.submit(&def).await.unwrap();

        let cancelled = client.cancel(&id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.wake_at.is_none());
        assert!(cancelled.completed_at.is_none());

        let err = client.cancel(&id).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidTransition { status: ExecutionStatus::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn cancel_after_completion_leaves_the_row_alone() {
        let client = client();
        let def = DefinitionBuilder::new(&Codec::new(), "svc", "run").build();
        let id = client.submit(&def).await.unwrap();
        client.repo.claim(&id, ClaimKind::Fresh, Utc::now()).await.unwrap().unwrap();
        assert!(client.repo.finish(&id, Finish::Completed, Utc::now()).await.unwrap());

        let err = client.cancel(&id).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidTransition { status: ExecutionStatus::Completed, .. }
        ));
        let row = client.status(&id).await.unwrap();
        assert_eq!(row.status, ExecutionStatus::Completed);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let client = client();
        let id = Uuid::now_v7();
        assert!(matches!(client.status(&id).await, Err(ClientError::NotFound(_))));
        assert!(matches!(client.cancel(&id).await, Err(ClientError::NotFound(_))));
    }
}

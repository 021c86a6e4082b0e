//! Workflow error taxonomy.
//!
//! `Suspended` and `Canceled` are control signals, not failures: they unwind
//! the workflow body through `?` and are mapped by the scheduler to
//! "leave the row as is". Every other variant ends the execution as failed.

use chrono::{DateTime, Utc};
use duraflow_types::error::RepositoryError;
use thiserror::Error;
use uuid::Uuid;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The body reached a timer that is not yet due. The execution is parked.
    #[error("workflow suspended until {wake_at}")]
    Suspended { wake_at: DateTime<Utc> },

    /// The execution was cancelled while running.
    #[error("workflow execution was cancelled")]
    Canceled,

    /// No service is registered under the definition's identifier.
    #[error("unresolved service: {0}")]
    UnresolvedService(String),

    /// The service exists but has no such method.
    #[error("unresolved method '{method}' on service '{service}'")]
    UnresolvedMethod { service: String, method: String },

    /// An argument or memoized result could not be encoded or decoded.
    #[error("unsupported type: {0}")]
    UnsupportedType(#[from] CodecError),

    /// The stored definition bytes are not a valid definition.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Arguments did not match what the handler expected.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The stored step history could not be read or written.
    #[error("flow state error: {0}")]
    State(String),

    /// The execution row disappeared while the context was using it.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Error raised by the workflow body itself.
    #[error("workflow failed: {0}")]
    Failed(String),
}

impl WorkflowError {
    /// Wrap an arbitrary body error.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        WorkflowError::Failed(err.to_string())
    }

    /// Whether this is a suspend/cancel signal rather than a failure.
    pub fn is_signal(&self) -> bool {
        matches!(self, WorkflowError::Suspended { .. } | WorkflowError::Canceled)
    }
}

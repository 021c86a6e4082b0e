//! Execution domain types.
//!
//! An `Execution` is one durable run of a workflow. It holds the serialized
//! workflow definition, the serialized step history (`state`, a `Flow`
//! document) and the lifecycle timestamps driven by the scheduler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution.
///
/// `Queued -> Running -> {Completed, Failed, Cancelled}`. A parked execution
/// is still `Running`; only a non-null `wake_at` distinguishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One durable workflow run, as persisted by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Serialized `WorkflowDefinition` (JSON bytes), opaque to storage.
    pub definition: Vec<u8>,
    /// Serialized parameter list, kept alongside the definition for inspection.
    pub params: String,
    /// Serialized `Flow`. `None` means no steps have been recorded yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// When the execution was submitted.
    pub queued_at: DateTime<Utc>,
    /// When the scheduler first claimed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when the status is `Completed` or `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wake-up instant while parked on a timer. Only set while `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// Error message if the execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// Build a freshly queued execution for a serialized definition.
    pub fn queued(definition: Vec<u8>, params: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            status: ExecutionStatus::Queued,
            definition,
            params,
            state: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            wake_at: None,
            error: None,
        }
    }

    /// Whether the execution is parked on a timer.
    pub fn is_parked(&self) -> bool {
        self.status == ExecutionStatus::Running && self.wake_at.is_some()
    }

    /// Whether a parked execution is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Running && self.wake_at.is_some_and(|at| at <= now)
    }
}

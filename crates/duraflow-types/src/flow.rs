//! Step history of an execution.
//!
//! A `Flow` is the document stored in `Execution.state`: a flat list of
//! memoized `Action` records addressed by their positional id (`"0"`,
//! `"0.1"`, ...). Storage order carries no meaning; lookup is by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal stored as `result` for a null value.
pub const NULL_RESULT: &str = "null";

/// The persisted step history of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// The owning execution's id, rendered as a string.
    #[serde(default)]
    pub id: String,
    /// Memoized steps. Ids are unique within a flow.
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// One memoized step.
///
/// `name` is diagnostic only; identity is the positional `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Encoded result text, or the literal `"null"`.
    #[serde(default)]
    pub result: Option<String>,
    /// Codec type tag; `None` iff the value is null.
    #[serde(default)]
    pub result_type: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// Pending wake-up for timer actions.
    #[serde(default)]
    pub wake_at: Option<DateTime<Utc>>,
}

impl Action {
    /// An empty, incomplete action at `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            result: None,
            result_type: None,
            completed: false,
            wake_at: None,
        }
    }
}

impl Flow {
    /// Empty flow for an execution.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actions: Vec::new(),
        }
    }

    /// Parse a stored flow document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize for storage in `Execution.state`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn find(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.id == id)
    }

    /// Replace the action with the same id, or append it.
    ///
    /// Never produces a duplicate id.
    pub fn upsert(&mut self, action: Action) {
        match self.find_mut(&action.id) {
            Some(existing) => *existing = action,
            None => self.actions.push(action),
        }
    }

    /// Number of completed actions.
    pub fn completed_count(&self) -> usize {
        self.actions.iter().filter(|a| a.completed).count()
    }
}

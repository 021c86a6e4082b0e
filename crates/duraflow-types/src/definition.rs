//! Portable workflow definitions.
//!
//! A `WorkflowDefinition` names which registered handler method to call and
//! with which encoded arguments. It is serialized into `Execution.definition`
//! at submission time and decoded by the scheduler on every attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type tag marking the parameter slot that receives the live replay context.
pub const CONTEXT_TYPE_TAG: &str = "execution-context";

/// Identifies a registered workflow service (the handler instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentifier {
    pub name: String,
}

impl ServiceIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One positional argument of a workflow method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParameter {
    /// Parameter name (diagnostic).
    pub name: String,
    /// Codec type tag, or `CONTEXT_TYPE_TAG` for the context slot.
    #[serde(rename = "type")]
    pub type_tag: Option<String>,
    /// Encoded value text. Always `None` for the context slot.
    #[serde(default)]
    pub value: Option<String>,
}

impl WorkflowParameter {
    /// The placeholder parameter substituted with the live context at invocation.
    pub fn context(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: Some(CONTEXT_TYPE_TAG.to_string()),
            value: None,
        }
    }

    pub fn is_context(&self) -> bool {
        self.type_tag.as_deref() == Some(CONTEXT_TYPE_TAG)
    }
}

/// The portable description of which handler/method/arguments to invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub service_identifier: ServiceIdentifier,
    pub method_name: String,
    #[serde(default)]
    pub parameters: Vec<WorkflowParameter>,
}

impl WorkflowDefinition {
    /// Decode a definition from the bytes stored on an execution.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode for storage on an execution.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// The parameter list alone, as stored in `Execution.params`.
    pub fn params_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.parameters)
    }
}

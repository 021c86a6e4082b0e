//! Shared domain types for duraflow.
//!
//! This crate contains the persisted data model of the engine: the
//! `Execution` row, its step history (`Flow` / `Action`), the portable
//! `WorkflowDefinition`, engine configuration, and repository errors.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod execution;
pub mod flow;

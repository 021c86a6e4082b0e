//! Durable execution kernel for duraflow.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus everything that runs a workflow: the type-tagged
//! codec, the replay context, handler invocation, the polling scheduler and
//! the submission client. It depends only on `duraflow-types` -- never on
//! `duraflow-infra` or any database/IO crate.

pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod invocation;
pub mod repository;
pub mod scheduler;

pub use client::{ClientError, DefinitionBuilder, WorkflowClient};
pub use codec::{Codec, CodecError, Durable, DurableRecord, Json, TypedValue};
pub use context::ReplayContext;
pub use error::WorkflowError;
pub use invocation::{
    Argument, Arguments, HandlerRegistry, ServiceInstanceProvider, WorkflowService,
};
pub use scheduler::{AttemptOutcome, Scheduler, SchedulerError, TickReport};

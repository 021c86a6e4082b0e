//! Observability setup for duraflow: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;

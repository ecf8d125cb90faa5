//! Observability for Courier: subscriber setup and OpenTelemetry export.

pub mod tracing_setup;

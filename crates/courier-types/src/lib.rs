//! Shared domain types for Courier.
//!
//! This crate contains the types exchanged between the workflow engine, its
//! storage adapters, and the CLI: workflow graphs, per-node results, pause
//! state, execution records, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod workflow;

//! Workflow execution engine and repository trait definitions for Courier.
//!
//! This crate holds the scheduler and the "ports" (repository traits) that
//! the infrastructure layer implements. It never depends on `courier-infra`
//! or any database/IO crate.

pub mod repository;
pub mod workflow;

//! Infrastructure layer for Courier.
//!
//! Contains implementations of the traits defined in `courier-core`: the
//! SQLite pause store, the outbound HTTP request capability, and the
//! `config.toml` loader.

pub mod config;
pub mod sqlite;
pub mod workflow;

//! Workflow capabilities backed by real services.
//!
//! - `http` -- the `HTTP Request` action via `reqwest::Client`
//!
//! [`default_registry`] wires every infrastructure capability into a
//! [`CapabilityRegistry`] for the CLI.

pub mod http;

use courier_core::workflow::capability::CapabilityRegistry;
use courier_types::config::HttpConfig;

use self::http::{HttpRequestCapability, ACTION_HTTP_REQUEST};

/// Registry with every capability this crate provides.
pub fn default_registry(http: &HttpConfig) -> Result<CapabilityRegistry, reqwest::Error> {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        ACTION_HTTP_REQUEST,
        ACTION_HTTP_REQUEST,
        HttpRequestCapability::new(http)?,
    );
    Ok(registry)
}

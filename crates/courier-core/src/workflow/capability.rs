//! Capability registry: action and trigger implementations looked up by name.
//!
//! The engine handles the built-in actions itself. Every other action type,
//! and every trigger type, is dispatched to a [`Capability`] registered here.
//! Unknown action types produce a configuration failure listing the names the
//! engine understands.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use courier_types::workflow::{NodeKind, BUILTIN_ACTIONS};
use serde_json::{Map, Value};

/// Boxed future returned by [`Capability::execute`].
pub type CapabilityFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, CapabilityError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// The capability ran and reported failure.
    #[error("{0}")]
    Failed(String),

    /// The resolved configuration is unusable for this capability.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Everything a capability receives for one attempt.
#[derive(Debug, Clone, Default)]
pub struct CapabilityInput {
    pub node_id: String,
    pub action_type: String,
    /// Template-resolved node configuration.
    pub config: Map<String, Value>,
    /// The run's trigger payload.
    pub trigger: Value,
    /// Snapshot of run variables at dispatch time.
    pub variables: HashMap<String, Value>,
    pub workflow_id: Option<String>,
    pub execution_id: Option<String>,
}

/// An action or trigger implementation.
///
/// Returns a boxed future so registries can hold heterogeneous handlers as
/// trait objects.
pub trait Capability: Send + Sync {
    fn execute(&self, input: CapabilityInput) -> CapabilityFuture<'_>;
}

/// Adapter that turns an async closure into a [`Capability`].
pub struct FnCapability<F>(F);

impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(CapabilityInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    fn execute(&self, input: CapabilityInput) -> CapabilityFuture<'_> {
        Box::pin((self.0)(input))
    }
}

/// Wrap an async closure as a capability.
pub fn capability_fn<F, Fut>(f: F) -> FnCapability<F>
where
    F: Fn(CapabilityInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    FnCapability(f)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Registration {
    label: String,
    handler: Arc<dyn Capability>,
}

/// Static table of capabilities keyed by action or trigger type.
///
/// Built once at startup and cloned cheaply into each engine.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Registration>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `type_name`.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        label: impl Into<String>,
        handler: impl Capability + 'static,
    ) -> &mut Self {
        let type_name = type_name.into();
        tracing::debug!(capability = %type_name, "registering capability");
        self.entries.insert(
            type_name,
            Registration {
                label: label.into(),
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        type_name: impl Into<String>,
        label: impl Into<String>,
        handler: impl Capability + 'static,
    ) -> Self {
        self.register(type_name, label, handler);
        self
    }

    pub fn resolve(&self, type_name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(type_name).map(|r| r.handler.clone())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Display label for a node, falling back to the node kind.
    pub fn label_for(&self, type_name: Option<&str>, kind: &NodeKind) -> String {
        match type_name {
            Some(name) => self
                .entries
                .get(name)
                .map(|r| r.label.clone())
                .unwrap_or_else(|| name.to_string()),
            None => match kind {
                NodeKind::Trigger => "Trigger".to_string(),
                NodeKind::Action => "Action".to_string(),
                NodeKind::Other(other) => other.clone(),
            },
        }
    }

    /// Every action name the engine understands: built-ins first, then
    /// registered types.
    pub fn available_actions(&self) -> Vec<String> {
        let registered: BTreeSet<&str> = self
            .entries
            .keys()
            .map(String::as_str)
            .filter(|name| !BUILTIN_ACTIONS.contains(name))
            .collect();
        BUILTIN_ACTIONS
            .iter()
            .copied()
            .chain(registered)
            .map(str::to_string)
            .collect()
    }

    /// Message recorded for an action type that nothing can execute.
    pub fn unknown_action_message(&self, action_type: &str) -> String {
        format!(
            "Unknown action type \"{action_type}\". Available actions: {}",
            self.available_actions().join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> impl Capability {
        capability_fn(|input: CapabilityInput| async move {
            Ok(json!({ "echo": input.config.get("text").cloned().unwrap_or(Value::Null) }))
        })
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = CapabilityRegistry::new().with("Echo", "Echo Text", echo());
        let handler = registry.resolve("Echo").expect("registered");

        let mut config = Map::new();
        config.insert("text".into(), json!("hi"));
        let output = handler
            .execute(CapabilityInput {
                config,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(output, json!({ "echo": "hi" }));
        assert!(registry.resolve("Missing").is_none());
    }

    #[test]
    fn test_label_lookup() {
        let registry = CapabilityRegistry::new().with("Echo", "Echo Text", echo());
        assert_eq!(registry.label_for(Some("Echo"), &NodeKind::Action), "Echo Text");
        assert_eq!(registry.label_for(Some("Delay"), &NodeKind::Action), "Delay");
        assert_eq!(registry.label_for(None, &NodeKind::Trigger), "Trigger");
    }

    #[test]
    fn test_unknown_action_message_lists_builtins_and_registered() {
        let registry = CapabilityRegistry::new()
            .with("Send SMS", "Send SMS", echo())
            .with("Delay", "Delay override", echo());
        let message = registry.unknown_action_message("Frobnicate");
        assert_eq!(
            message,
            "Unknown action type \"Frobnicate\". Available actions: \
             Delay, Set Variable, Get Variable, Condition, Ask Question, Send SMS"
        );
    }

    #[test]
    fn test_types_sorted() {
        let registry = CapabilityRegistry::new()
            .with("b", "B", echo())
            .with("a", "A", echo());
        assert_eq!(registry.types(), vec!["a", "b"]);
        assert!(registry.contains("a"));
    }
}

//! Workflow domain types for Courier.
//!
//! Defines the graph representation authored in the dashboard (`Node`,
//! `Edge`), the typed view of an action node's configuration
//! (`ActionConfig`), per-node execution results, and the records that bridge
//! a paused run to its resumption (`Conversation`, `ExecutionRecord`).
//!
//! All wire shapes use camelCase field names to match the JSON the editor
//! produces.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Built-in action names
// ---------------------------------------------------------------------------

pub const ACTION_DELAY: &str = "Delay";
pub const ACTION_SET_VARIABLE: &str = "Set Variable";
pub const ACTION_GET_VARIABLE: &str = "Get Variable";
pub const ACTION_CONDITION: &str = "Condition";
pub const ACTION_ASK_QUESTION: &str = "Ask Question";

/// Action types the engine executes without consulting the capability registry.
pub const BUILTIN_ACTIONS: &[&str] = &[
    ACTION_DELAY,
    ACTION_SET_VARIABLE,
    ACTION_GET_VARIABLE,
    ACTION_CONDITION,
    ACTION_ASK_QUESTION,
];

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// The kind of a graph node.
///
/// Unknown kinds are preserved rather than rejected at parse time so the
/// scheduler can record a configuration failure for that node alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Trigger,
    Action,
    Other(String),
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "trigger" => NodeKind::Trigger,
            "action" => NodeKind::Action,
            _ => NodeKind::Other(value),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Trigger => write!(f, "trigger"),
            NodeKind::Action => write!(f, "action"),
            NodeKind::Other(other) => write!(f, "{other}"),
        }
    }
}

/// A trigger or action unit in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID within the graph.
    pub id: String,
    /// Node kind (`trigger`, `action`, or anything else the editor emitted).
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Human-readable label shown in the editor.
    #[serde(default)]
    pub label: String,
    /// Disabled nodes are skipped, not executed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Untyped configuration bag as authored.
    #[serde(default)]
    pub config: NodeConfig,
}

fn default_enabled() -> bool {
    true
}

/// Directed dependency: `target` runs only after `source` resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Raw node configuration as a JSON object.
///
/// Accessors cover the fields the engine itself reads; everything else is
/// passed through to the step implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(pub Map<String, Value>);

impl NodeConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The configured action type, ignoring blank strings.
    pub fn action_type(&self) -> Option<&str> {
        non_blank_str(self.0.get("actionType"))
    }

    pub fn trigger_type(&self) -> Option<&str> {
        non_blank_str(self.0.get("triggerType"))
    }

    pub fn condition(&self) -> Option<&Value> {
        self.0.get("condition")
    }

    pub fn retry_count(&self) -> Option<u32> {
        self.0
            .get("retryCount")
            .and_then(value_as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
    }

    pub fn retry_delay_ms(&self) -> Option<u64> {
        self.0.get("retryDelayMs").and_then(value_as_u64)
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.0.get("timeoutMs").and_then(value_as_u64)
    }

    /// Mock/default payload a trigger node contributes to its trigger data.
    pub fn mock_payload(&self) -> Option<&Value> {
        self.0
            .get("mockPayload")
            .or_else(|| self.0.get("defaultPayload"))
    }
}

impl From<Map<String, Value>> for NodeConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn non_blank_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Interpret a JSON number or numeric string as a non-negative integer.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(0);
    }
    value_as_u64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative number, got {value}")))
}

// ---------------------------------------------------------------------------
// Typed action configuration
// ---------------------------------------------------------------------------

/// Typed view of an action node's (template-resolved) configuration.
///
/// Each built-in action carries only its own fields; any other action type
/// lands in `Generic` and is handed to the capability registry as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionConfig {
    Delay(DelayConfig),
    SetVariable(SetVariableConfig),
    GetVariable(GetVariableConfig),
    Condition(ConditionConfig),
    AskQuestion(AskQuestionConfig),
    Generic {
        action_type: String,
        fields: Map<String, Value>,
    },
}

impl ActionConfig {
    /// Parse a configuration object for the given action type.
    ///
    /// Fails only when a built-in action's fields are malformed.
    pub fn from_config(
        action_type: &str,
        config: &Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        let object = || Value::Object(config.clone());
        Ok(match action_type {
            ACTION_DELAY => ActionConfig::Delay(serde_json::from_value(object())?),
            ACTION_SET_VARIABLE => ActionConfig::SetVariable(serde_json::from_value(object())?),
            ACTION_GET_VARIABLE => ActionConfig::GetVariable(serde_json::from_value(object())?),
            ACTION_CONDITION => ActionConfig::Condition(serde_json::from_value(object())?),
            ACTION_ASK_QUESTION => ActionConfig::AskQuestion(serde_json::from_value(object())?),
            other => ActionConfig::Generic {
                action_type: other.to_string(),
                fields: config.clone(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    #[serde(default, alias = "delay", deserialize_with = "lenient_u64")]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableConfig {
    pub variable_key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVariableConfig {
    pub variable_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    #[serde(default)]
    pub condition: Option<ConditionInput>,
}

/// A condition is either a literal boolean or an expression string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionInput {
    Bool(bool),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskQuestionConfig {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub variable_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Error string recorded for nodes that were skipped instead of executed.
pub const SKIPPED: &str = "skipped";

/// Outcome of a single node within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped() -> Self {
        Self::failure(SKIPPED)
    }

    pub fn is_skipped(&self) -> bool {
        !self.success && self.error.as_deref() == Some(SKIPPED)
    }
}

/// What a node produced, as seen by template references in later nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub label: String,
    pub data: Value,
}

/// Key under which a node's output is stored: every character outside
/// `[A-Za-z0-9]` becomes `_`.
pub fn sanitize_node_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Input to one engine invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Non-empty only for resumed runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_node_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub initial_variables: HashMap<String, Value>,
}

/// Output of one engine invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub results: HashMap<String, ExecutionResult>,
    pub outputs: HashMap<String, NodeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_node_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Pause state
// ---------------------------------------------------------------------------

/// Lifecycle of a suspended conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Consumed,
}

/// Persisted suspension record: the only state that survives between the
/// pausing invocation and the resuming one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub workflow_id: String,
    pub phone: String,
    pub resume_node_id: String,
    pub variable_key: String,
    pub variables: HashMap<String, Value>,
    /// Execution record that the resumed run continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the engine when it pauses a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub workflow_id: String,
    pub phone: String,
    pub resume_node_id: String,
    pub variable_key: String,
    pub variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution record
// ---------------------------------------------------------------------------

/// Status of a run as seen by the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Waiting,
    Success,
    Error,
}

impl ExecutionStatus {
    /// Terminal statuses stamp `finished_at`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Error)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// System-of-record view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// A status transition written by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUpdate {
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

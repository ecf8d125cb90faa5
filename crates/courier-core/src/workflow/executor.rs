//! Workflow executor: dependency-counting scheduler with pause/resume.
//!
//! The `WorkflowEngine` runs a graph with a FIFO ready queue. A node becomes
//! ready once every incoming edge has resolved and at least one of them
//! allowed it; if none did, the node is skipped and the skip cascades. Nodes
//! run strictly one at a time.
//!
//! # Execution flow
//!
//! 1. Build the `WorkflowGraph` (scoped to `start_node_ids` when resuming).
//! 2. Mark the execution record `running`.
//! 3. Seed the queue with zero-dependency nodes in declaration order.
//! 4. For each ready node: skip if disabled, otherwise run it through the
//!    step runner and record its result and output.
//! 5. An `Ask Question` node that succeeds persists a `Conversation`, marks
//!    the execution `waiting`, and ends the invocation early.
//! 6. Otherwise propagate along outgoing edges; when the queue drains, mark
//!    the execution `success` or `error`.

use std::collections::HashMap;
use std::future::{ready, Future};
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_types::config::ExecutionPolicy;
use courier_types::error::RepositoryError;
use courier_types::workflow::{
    ActionConfig, AskQuestionConfig, Conversation, Edge, ExecutionResult,
    ExecutionStatus, ExecutionUpdate, NewConversation, Node, NodeKind, RunOutcome, RunRequest,
    ACTION_ASK_QUESTION, BUILTIN_ACTIONS,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::repository::pause::PauseStore;

use super::capability::{Capability, CapabilityInput, CapabilityRegistry};
use super::condition::ConditionEvaluator;
use super::context::RunState;
use super::graph::{GraphError, WorkflowGraph};
use super::pause::{correlation_phone, normalize_phone, resume_request, resume_target};
use super::step_runner::{run_step, StepError, StepPolicy};
use super::template::TemplateResolver;

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the project's Rust 2024 edition approach.
pub trait WorkflowExecutor: Send + Sync {
    /// Run a graph (or, with `start_node_ids`, a resumed subgraph).
    ///
    /// Never fails: node failures are recorded per node and graph errors are
    /// reported through `RunOutcome::error`.
    fn execute(&self, request: RunRequest) -> impl Future<Output = RunOutcome> + Send;

    /// Consume an open conversation and continue the run it paused.
    fn resume(
        &self,
        request: ResumeRequest,
    ) -> impl Future<Output = Result<RunOutcome, ExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// Errors and requests
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("conversation {0} is not open")]
    ConversationClosed(Uuid),

    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("no open conversation for {0}")]
    NoOpenConversation(String),

    #[error("invalid phone number '{0}'")]
    InvalidPhone(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Answer to a paused conversation.
#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub conversation: Conversation,
    pub answer: Value,
    /// Payload of the inbound reply, visible to resumed nodes as trigger data.
    pub trigger_input: Option<Value>,
}

/// A configuration problem found without running the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub node_id: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// NodeOutcome
// ---------------------------------------------------------------------------

/// What executing one node produced.
struct NodeOutcome {
    result: ExecutionResult,
    allow_outgoing: bool,
    pause: Option<NewConversation>,
}

impl NodeOutcome {
    fn from_step(step: Result<Value, StepError>) -> Self {
        match step {
            Ok(data) => Self {
                result: ExecutionResult::ok(data),
                allow_outgoing: true,
                pause: None,
            },
            Err(err) => Self::failed(err.to_string()),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            result: ExecutionResult::failure(error),
            allow_outgoing: false,
            pause: None,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Sequential workflow engine.
///
/// Generic over `S: PauseStore` for storage flexibility.
pub struct WorkflowEngine<S: PauseStore> {
    store: S,
    registry: CapabilityRegistry,
    policy: ExecutionPolicy,
}

impl<S: PauseStore> WorkflowEngine<S> {
    pub fn new(store: S, registry: CapabilityRegistry, policy: ExecutionPolicy) -> Self {
        Self {
            store,
            registry,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Resume the most recent open conversation for `phone`.
    pub async fn resume_by_phone(
        &self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        phone: &str,
        answer: Value,
        trigger_input: Option<Value>,
    ) -> Result<RunOutcome, ExecutorError> {
        let normalized =
            normalize_phone(phone).ok_or_else(|| ExecutorError::InvalidPhone(phone.to_string()))?;
        let conversation = self
            .store
            .find_open_conversation(&normalized)
            .await?
            .ok_or(ExecutorError::NoOpenConversation(normalized))?;
        self.resume(ResumeRequest {
            nodes,
            edges,
            conversation,
            answer,
            trigger_input,
        })
        .await
    }

    /// Resume a conversation by ID.
    pub async fn resume_by_id(
        &self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        conversation_id: &Uuid,
        answer: Value,
        trigger_input: Option<Value>,
    ) -> Result<RunOutcome, ExecutorError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ExecutorError::ConversationNotFound(*conversation_id))?;
        self.resume(ResumeRequest {
            nodes,
            edges,
            conversation,
            answer,
            trigger_input,
        })
        .await
    }

    /// Check a graph for structural errors and per-node configuration
    /// problems without executing anything.
    pub fn validate(
        &self,
        nodes: &[Node],
        edges: &[Edge],
    ) -> Result<Vec<ValidationIssue>, GraphError> {
        let graph = WorkflowGraph::build(nodes, edges, &[])?;
        let mut issues = Vec::new();
        let mut issue = |node: &Node, message: String| {
            issues.push(ValidationIssue {
                node_id: node.id.clone(),
                message,
            });
        };

        for node in graph.nodes() {
            match &node.kind {
                NodeKind::Trigger => {}
                NodeKind::Other(kind) => issue(node, format!("Unsupported node type \"{kind}\"")),
                NodeKind::Action => {
                    let Some(action_type) = node.config.action_type() else {
                        issue(node, "Action node has no action type configured".to_string());
                        continue;
                    };
                    if let Err(err) = ActionConfig::from_config(action_type, node.config.as_map()) {
                        issue(node, format!("Invalid \"{action_type}\" configuration: {err}"));
                        continue;
                    }
                    match action_type {
                        ACTION_ASK_QUESTION => {
                            if let Err(err) = resume_target(graph.targets(&node.id)) {
                                issue(node, err.to_string());
                            }
                        }
                        t if !BUILTIN_ACTIONS.contains(&t) && !self.registry.contains(t) => {
                            issue(node, self.registry.unknown_action_message(t));
                        }
                        _ => {}
                    }
                    if let Some(Value::String(expression)) = node.config.condition() {
                        if !expression.trim().is_empty() {
                            if let Err(err) = ConditionEvaluator::pre_validate(expression) {
                                issue(node, format!("Invalid condition: {err}"));
                            }
                        }
                    }
                }
            }
        }

        Ok(issues)
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Run the ready queue to exhaustion or until a node pauses the run.
    async fn drive(
        &self,
        request: &RunRequest,
        state: &mut RunState,
    ) -> Result<Option<Conversation>, GraphError> {
        // Skipped nodes read their label from the graph, so fallbacks are
        // applied before it is built.
        let nodes: Vec<Node> = request
            .nodes
            .iter()
            .map(|node| Node {
                label: self.node_label(node),
                ..node.clone()
            })
            .collect();
        let graph = WorkflowGraph::build(&nodes, &request.edges, &request.start_node_ids)?;
        if graph.is_empty() {
            tracing::warn!(start_node_ids = ?request.start_node_ids, "no nodes to run");
        }
        for root in graph.roots() {
            state.enqueue(root);
        }

        let mut trigger = request.trigger_input.clone().unwrap_or(Value::Null);

        while let Some(node_id) = state.pop_ready() {
            if state.is_resolved(&node_id) {
                continue;
            }
            let Some(node) = graph.node(&node_id) else {
                continue;
            };
            if !node.enabled {
                tracing::debug!(node_id = %node.id, "node disabled");
                state.skip(&graph, &node.id);
                continue;
            }

            let label = node.label.clone();
            tracing::debug!(node_id = %node.id, kind = %node.kind, label = %label, "executing node");

            let mut outcome = match &node.kind {
                NodeKind::Trigger => self.run_trigger(node, request).await,
                NodeKind::Action => self.run_action(node, &graph, request, state, &trigger).await,
                NodeKind::Other(kind) => {
                    NodeOutcome::failed(format!("Unsupported node type \"{kind}\""))
                }
            };

            if node.kind == NodeKind::Trigger && outcome.result.success {
                if let Some(data) = &outcome.result.data {
                    trigger = data.clone();
                }
            }

            if let Some(new_conversation) = outcome.pause.take() {
                match self.store.create_conversation(&new_conversation).await {
                    Ok(conversation) => {
                        state.record(&node.id, &label, outcome.result);
                        return Ok(Some(conversation));
                    }
                    Err(err) => {
                        tracing::error!(node_id = %node.id, error = %err, "failed to persist conversation");
                        outcome = NodeOutcome::failed(format!("failed to persist conversation: {err}"));
                    }
                }
            }

            if let Some(error) = &outcome.result.error {
                tracing::warn!(node_id = %node.id, error = %error, "node failed");
            }
            state.record(&node.id, &label, outcome.result);
            state.propagate(&graph, &node.id, outcome.allow_outgoing);
        }

        Ok(None)
    }

    async fn run_trigger(&self, node: &Node, request: &RunRequest) -> NodeOutcome {
        let payload = merge_trigger_payload(node.config.mock_payload(), request.trigger_input.as_ref());

        let handler = node
            .config
            .trigger_type()
            .and_then(|t| self.registry.resolve(t).map(|h| (t, h)));
        let Some((trigger_type, handler)) = handler else {
            return NodeOutcome::from_step(Ok(payload));
        };

        let input = CapabilityInput {
            node_id: node.id.clone(),
            action_type: trigger_type.to_string(),
            config: node.config.as_map().clone(),
            trigger: payload,
            variables: HashMap::new(),
            workflow_id: request.workflow_id.clone(),
            execution_id: request.execution_id.clone(),
        };
        let policy = StepPolicy::resolve(&node.config, &self.policy);
        NodeOutcome::from_step(invoke(&handler, &input, policy).await)
    }

    async fn run_action(
        &self,
        node: &Node,
        graph: &WorkflowGraph,
        request: &RunRequest,
        state: &mut RunState,
        trigger: &Value,
    ) -> NodeOutcome {
        let Some(action_type) = node.config.action_type() else {
            return NodeOutcome::failed("Action node has no action type configured");
        };

        let resolved = TemplateResolver::new(&state.outputs, &state.variables)
            .resolve_config(node.config.as_map());
        let action = match ActionConfig::from_config(action_type, &resolved) {
            Ok(action) => action,
            Err(err) => {
                return NodeOutcome::failed(format!(
                    "Invalid \"{action_type}\" configuration: {err}"
                ));
            }
        };
        let policy = StepPolicy::resolve(&node.config, &self.policy);

        match action {
            ActionConfig::Delay(config) => {
                let ms = config.delay_ms;
                NodeOutcome::from_step(
                    run_step(
                        || async move {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            Ok(json!({ "delayedMs": ms }))
                        },
                        policy,
                    )
                    .await,
                )
            }
            ActionConfig::SetVariable(config) => {
                let data = json!({ "key": config.variable_key, "value": config.value });
                let outcome = run_builtin(data, policy).await;
                if outcome.result.success {
                    state.variables.insert(config.variable_key, config.value);
                }
                outcome
            }
            ActionConfig::GetVariable(config) => {
                let value = state
                    .variables
                    .get(&config.variable_key)
                    .cloned()
                    .unwrap_or(Value::Null);
                run_builtin(json!({ "key": config.variable_key, "value": value }), policy).await
            }
            ActionConfig::Condition(config) => {
                let evaluated = ConditionEvaluator::evaluate(config.condition.as_ref(), &state.outputs);
                let mut outcome = run_builtin(evaluated.to_output(), policy).await;
                outcome.allow_outgoing = outcome.result.success && evaluated.value;
                outcome
            }
            ActionConfig::AskQuestion(config) => {
                let input = capability_input(node, ACTION_ASK_QUESTION, resolved, trigger, state, request);
                self.run_ask_question(node, graph, request, state, config, input, policy)
                    .await
            }
            ActionConfig::Generic {
                action_type,
                fields,
            } => match self.registry.resolve(&action_type) {
                Some(handler) => {
                    let input = capability_input(node, &action_type, fields, trigger, state, request);
                    NodeOutcome::from_step(invoke(&handler, &input, policy).await)
                }
                None => NodeOutcome::failed(self.registry.unknown_action_message(&action_type)),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_ask_question(
        &self,
        node: &Node,
        graph: &WorkflowGraph,
        request: &RunRequest,
        state: &RunState,
        config: AskQuestionConfig,
        input: CapabilityInput,
        policy: StepPolicy,
    ) -> NodeOutcome {
        let resume_node_id = match resume_target(graph.targets(&node.id)) {
            Ok(target) => target.to_string(),
            Err(err) => return NodeOutcome::failed(err.to_string()),
        };

        let step = match self.registry.resolve(ACTION_ASK_QUESTION) {
            Some(handler) => invoke(&handler, &input, policy).await,
            None => {
                let data = json!({ "question": config.question, "variableKey": config.variable_key });
                run_step(|| ready(Ok(data.clone())), policy).await
            }
        };
        let data = match step {
            Ok(data) => data,
            Err(err) => return NodeOutcome::failed(err.to_string()),
        };

        let Some(variable_key) = config
            .variable_key
            .filter(|k| !k.trim().is_empty())
        else {
            return NodeOutcome::failed("Ask Question requires a variableKey to store the answer");
        };
        let Some(workflow_id) = request.workflow_id.clone() else {
            return NodeOutcome::failed("Ask Question requires a workflowId to pause");
        };
        let Some(execution_id) = request.execution_id.clone() else {
            return NodeOutcome::failed("Ask Question requires an executionId to pause");
        };
        let Some(phone) = correlation_phone(&input.trigger) else {
            return NodeOutcome::failed(
                "Ask Question could not determine a phone number from the trigger data",
            );
        };

        NodeOutcome {
            result: ExecutionResult::ok(data),
            allow_outgoing: true,
            pause: Some(NewConversation {
                workflow_id,
                phone,
                resume_node_id,
                variable_key,
                variables: state.variables.clone(),
                execution_id: Some(execution_id),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn node_label(&self, node: &Node) -> String {
        if !node.label.trim().is_empty() {
            return node.label.clone();
        }
        let type_name = node.config.action_type().or_else(|| node.config.trigger_type());
        self.registry.label_for(type_name, &node.kind)
    }

    /// Write an execution status transition. Store failures are logged, never
    /// escalated.
    async fn record_status(
        &self,
        request: &RunRequest,
        status: ExecutionStatus,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let Some(execution_id) = &request.execution_id else {
            return;
        };
        let update = ExecutionUpdate {
            execution_id: execution_id.clone(),
            workflow_id: request.workflow_id.clone(),
            status,
            output,
            error,
        };
        if let Err(err) = self.store.update_execution_status(&update).await {
            tracing::warn!(
                execution_id = %execution_id,
                status = %status,
                error = %err,
                "failed to update execution record"
            );
        }
    }
}

impl<S: PauseStore> WorkflowExecutor for WorkflowEngine<S> {
    async fn execute(&self, request: RunRequest) -> RunOutcome {
        let started = Instant::now();
        let execution_id = request.execution_id.clone().unwrap_or_default();
        tracing::info!(
            execution_id = %execution_id,
            workflow_id = request.workflow_id.as_deref().unwrap_or_default(),
            nodes = request.nodes.len(),
            resumed = !request.start_node_ids.is_empty(),
            "workflow run started"
        );

        self.record_status(&request, ExecutionStatus::Running, None, None)
            .await;

        let mut state = RunState::new(request.initial_variables.clone());
        match self.drive(&request, &mut state).await {
            Err(err) => {
                tracing::error!(execution_id = %execution_id, error = %err, "workflow graph rejected");
                self.record_status(&request, ExecutionStatus::Error, None, Some(err.to_string()))
                    .await;
                state.into_outcome(false, Some(err.to_string()))
            }
            Ok(Some(conversation)) => {
                tracing::info!(
                    execution_id = %execution_id,
                    conversation_id = %conversation.id,
                    resume_node_id = %conversation.resume_node_id,
                    "workflow paused awaiting answer"
                );
                self.record_status(&request, ExecutionStatus::Waiting, Some(state.snapshot()), None)
                    .await;
                RunOutcome {
                    paused: true,
                    conversation_id: Some(conversation.id),
                    resume_node_id: Some(conversation.resume_node_id),
                    ..state.into_outcome(true, None)
                }
            }
            Ok(None) => {
                let success = state.all_succeeded();
                let error = (!success).then(|| {
                    let failed = state.failed_nodes();
                    format!("{} node(s) did not succeed: {}", failed.len(), failed.join(", "))
                });
                let status = if success {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Error
                };
                tracing::info!(
                    execution_id = %execution_id,
                    success,
                    nodes_run = state.results.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "workflow run finished"
                );
                self.record_status(&request, status, Some(state.snapshot()), error)
                    .await;
                state.into_outcome(success, None)
            }
        }
    }

    async fn resume(&self, request: ResumeRequest) -> Result<RunOutcome, ExecutorError> {
        let ResumeRequest {
            nodes,
            edges,
            conversation,
            answer,
            trigger_input,
        } = request;

        if !self.store.consume_conversation(&conversation.id).await? {
            return Err(ExecutorError::ConversationClosed(conversation.id));
        }
        tracing::info!(
            conversation_id = %conversation.id,
            resume_node_id = %conversation.resume_node_id,
            "resuming conversation"
        );

        let run = resume_request(nodes, edges, &conversation, answer, trigger_input);
        Ok(self.execute(run).await)
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Run a capability through the step runner.
async fn invoke(
    handler: &Arc<dyn Capability>,
    input: &CapabilityInput,
    policy: StepPolicy,
) -> Result<Value, StepError> {
    run_step(
        || {
            let input = input.clone();
            async move { handler.execute(input).await.map_err(StepError::from) }
        },
        policy,
    )
    .await
}

/// Run a synchronous built-in through the step runner.
async fn run_builtin(data: Value, policy: StepPolicy) -> NodeOutcome {
    NodeOutcome::from_step(run_step(|| ready(Ok(data.clone())), policy).await)
}

fn capability_input(
    node: &Node,
    action_type: &str,
    config: Map<String, Value>,
    trigger: &Value,
    state: &RunState,
    request: &RunRequest,
) -> CapabilityInput {
    CapabilityInput {
        node_id: node.id.clone(),
        action_type: action_type.to_string(),
        config,
        trigger: trigger.clone(),
        variables: state.variables.clone(),
        workflow_id: request.workflow_id.clone(),
        execution_id: request.execution_id.clone(),
    }
}

/// Trigger data: the node's mock payload overlaid with the caller's input.
///
/// When both are objects they merge key by key with the input winning;
/// otherwise a non-null input replaces the mock entirely.
pub fn merge_trigger_payload(mock: Option<&Value>, input: Option<&Value>) -> Value {
    match (mock, input) {
        (Some(Value::Object(base)), Some(Value::Object(overlay))) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Some(input)) if !input.is_null() => input.clone(),
        (Some(mock), _) => mock.clone(),
        _ => Value::Object(Map::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Workflow engine core: graph model, template and condition evaluation,
//! step execution, and the pause/resume protocol.
//!
//! - `graph` -- adjacency, dependency counts, scoped resume mode, cycle detection
//! - `template` -- `{{var.KEY}}` and `{{@NODEID:LABEL.path}}` substitution
//! - `condition` -- whitelisted expression grammar, fail-closed evaluation
//! - `step_runner` -- per-attempt timeout and exponential-backoff retry
//! - `capability` -- registry of action and trigger implementations
//! - `context` -- per-run results, outputs, variables, and edge counters
//! - `pause` -- phone correlation and resume request construction
//! - `executor` -- the dependency-counting scheduler

pub mod capability;
pub mod condition;
pub mod context;
pub mod executor;
pub mod graph;
pub mod pause;
pub mod step_runner;
pub mod template;

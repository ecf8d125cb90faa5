//! Pause/resume protocol helpers.
//!
//! An `Ask Question` node suspends the run after it succeeds. The
//! suspension is keyed by the recipient's phone number, taken from the
//! trigger payload, and records the single node to resume at plus the
//! variables accumulated so far. Resumption is a separate scoped run
//! starting at that node.

use std::collections::HashMap;

use courier_types::workflow::{Conversation, Edge, Node, RunRequest};
use serde_json::Value;

use super::step_runner::StepError;

/// Trigger fields searched, in order, for the correlation phone number.
/// Dotted entries address nested objects.
pub const PHONE_FIELDS: &[&str] = &["phone", "from", "sender", "contact.phone", "message.from"];

/// Phone numbers with fewer digits than this are rejected.
const MIN_PHONE_DIGITS: usize = 7;

/// Normalize a phone number to `+` followed by its digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return None;
    }
    Some(format!("+{digits}"))
}

/// Derive the correlation phone from a trigger payload.
pub fn correlation_phone(trigger: &Value) -> Option<String> {
    PHONE_FIELDS.iter().find_map(|path| {
        let value = path
            .split('.')
            .try_fold(trigger, |current, key| current.get(key))?;
        match value {
            Value::String(s) => normalize_phone(s),
            Value::Number(n) => normalize_phone(&n.to_string()),
            _ => None,
        }
    })
}

/// The single node a paused run resumes at.
///
/// Zero or multiple outgoing edges are configuration errors: the first has
/// nowhere to resume, the second would need to resume several branches.
pub fn resume_target(targets: &[String]) -> Result<&str, StepError> {
    match targets {
        [] => Err(StepError::Configuration(
            "Ask Question requires a following node to resume".to_string(),
        )),
        [only] => Ok(only.as_str()),
        _ => Err(StepError::Configuration(
            "Ask Question supports only one outgoing path".to_string(),
        )),
    }
}

/// Build the scoped run request that resumes `conversation` with `answer`.
pub fn resume_request(
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    conversation: &Conversation,
    answer: Value,
    trigger_input: Option<Value>,
) -> RunRequest {
    let mut variables: HashMap<String, Value> = conversation.variables.clone();
    variables.insert(conversation.variable_key.clone(), answer);

    RunRequest {
        nodes,
        edges,
        trigger_input,
        execution_id: conversation.execution_id.clone(),
        workflow_id: Some(conversation.workflow_id.clone()),
        start_node_ids: vec![conversation.resume_node_id.clone()],
        initial_variables: variables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_types::workflow::ConversationStatus;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-0100").as_deref(), Some("+15550100100"));
        assert_eq!(normalize_phone("whatsapp:+44 7700 900123").as_deref(), Some("+447700900123"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_correlation_phone_field_order() {
        let trigger = json!({ "from": "+1 555 0100 200", "sender": "999999999" });
        assert_eq!(correlation_phone(&trigger).as_deref(), Some("+15550100200"));

        let nested = json!({ "message": { "from": 15550100300u64 } });
        assert_eq!(correlation_phone(&nested).as_deref(), Some("+15550100300"));

        let contact = json!({ "phone": "n/a", "contact": { "phone": "555-0100-400" } });
        assert_eq!(correlation_phone(&contact).as_deref(), Some("+5550100400"));

        assert_eq!(correlation_phone(&json!({ "text": "hi" })), None);
        assert_eq!(correlation_phone(&Value::Null), None);
    }

    #[test]
    fn test_resume_target_topology() {
        assert_eq!(resume_target(&["next".to_string()]).unwrap(), "next");

        let err = resume_target(&[]).unwrap_err();
        assert!(err.to_string().contains("requires a following node"));

        let err = resume_target(&["a".to_string(), "b".to_string()]).unwrap_err();
        assert!(err.to_string().contains("only one outgoing path"));
    }

    #[test]
    fn test_resume_request_merges_answer() {
        let conversation = Conversation {
            id: Uuid::now_v7(),
            workflow_id: "wf-1".into(),
            phone: "+15550100".into(),
            resume_node_id: "reply".into(),
            variable_key: "answer".into(),
            variables: HashMap::from([
                ("name".to_string(), json!("Ada")),
                ("answer".to_string(), json!("stale")),
            ]),
            execution_id: Some("exec-1".into()),
            status: ConversationStatus::Open,
            created_at: Utc::now(),
            consumed_at: None,
        };

        let request = resume_request(vec![], vec![], &conversation, json!("yes"), None);
        assert_eq!(request.start_node_ids, vec!["reply"]);
        assert_eq!(request.initial_variables["answer"], json!("yes"));
        assert_eq!(request.initial_variables["name"], json!("Ada"));
        assert_eq!(request.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(request.workflow_id.as_deref(), Some("wf-1"));
    }
}

//! Template resolution for node configuration.
//!
//! Two token forms are recognised inside string values:
//!
//! - `{{var.KEY}}` -- the run variable `KEY`.
//! - `{{@NODEID:LABEL.path.to.field}}` -- a field of an earlier node's output.
//!   The label is informational; lookup is by sanitized node ID.
//!
//! Substitution is text-level and never fails: unknown references render as
//! the empty string. Conditions use the same reference grammar but look
//! values up *typed* via [`lookup_reference`] instead of splicing text.

use std::collections::HashMap;
use std::sync::LazyLock;

use courier_types::workflow::{sanitize_node_id, NodeOutput};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// Matches both token forms in a single pass so substituted text is never
/// rescanned.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:var\.(?P<var>[^{}]+?)|@(?P<node>[^:{}]+):(?P<rest>[^{}]*?))\s*\}\}")
        .expect("token regex is valid")
});

/// Node-reference tokens only.
static NODE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*@(?P<node>[^:{}]+):(?P<rest>[^{}]*?)\s*\}\}")
        .expect("node reference regex is valid")
});

/// Configuration key that is left untouched by [`TemplateResolver::resolve_config`].
const RAW_CONDITION_KEY: &str = "condition";

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// A parsed `{{@NODEID:LABEL.path}}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub node_id: String,
    pub label: String,
    pub path: Vec<String>,
}

impl Reference {
    fn from_parts(node: &str, rest: &str) -> Self {
        let rest = rest.trim();
        let (label, path) = match rest.split_once('.') {
            Some((label, path)) => (
                label,
                path.split('.')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            None => (rest, Vec::new()),
        };
        Self {
            node_id: node.trim().to_string(),
            label: label.trim().to_string(),
            path,
        }
    }

    /// Human-readable key, `NODEID:LABEL.path`, used in audit output.
    pub fn display_key(&self) -> String {
        if self.path.is_empty() {
            format!("{}:{}", self.node_id, self.label)
        } else {
            format!("{}:{}.{}", self.node_id, self.label, self.path.join("."))
        }
    }
}

/// Match a node reference starting exactly at byte `pos`.
pub(crate) fn node_reference_at(text: &str, pos: usize) -> Option<(usize, Reference)> {
    let caps = NODE_REF_RE.captures_at(text, pos)?;
    let whole = caps.get(0)?;
    if whole.start() != pos {
        return None;
    }
    Some((
        whole.end(),
        Reference::from_parts(&caps["node"], &caps["rest"]),
    ))
}

/// Look up a reference against accumulated node outputs, preserving type.
///
/// With no path the whole stored data is returned as-is. Otherwise, if the
/// stored data is a result envelope (`{success, data, error}`) and the path
/// does not start with one of those keys, the lookup descends into `data`
/// first. Missing values yield `Value::Null`.
pub fn lookup_reference(outputs: &HashMap<String, NodeOutput>, reference: &Reference) -> Value {
    let Some(output) = outputs.get(&sanitize_node_id(&reference.node_id)) else {
        return Value::Null;
    };

    let mut current = &output.data;
    let starts_with_envelope_key = reference
        .path
        .first()
        .is_some_and(|seg| matches!(seg.as_str(), "success" | "data" | "error"));
    if !reference.path.is_empty() && is_result_envelope(current) && !starts_with_envelope_key {
        current = match current.get("data") {
            Some(inner) => inner,
            None => return Value::Null,
        };
    }

    for segment in &reference.path {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }

    current.clone()
}

/// Keys drawn only from `success`, `data`, `error`, with `success` and `data`
/// both present. `error` is optional.
fn is_result_envelope(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key("success")
                && map.contains_key("data")
                && map
                    .keys()
                    .all(|k| matches!(k.as_str(), "success" | "data" | "error"))
        }
        _ => false,
    }
}

/// Text rendering used when a value is spliced into a string.
///
/// Strings render bare, null renders empty, everything else as JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// TemplateResolver
// ---------------------------------------------------------------------------

/// Resolves template tokens against a run's outputs and variables.
#[derive(Debug, Clone, Copy)]
pub struct TemplateResolver<'a> {
    outputs: &'a HashMap<String, NodeOutput>,
    variables: &'a HashMap<String, Value>,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(
        outputs: &'a HashMap<String, NodeOutput>,
        variables: &'a HashMap<String, Value>,
    ) -> Self {
        Self { outputs, variables }
    }

    /// Replace every token in `text`.
    pub fn resolve_str(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        TOKEN_RE
            .replace_all(text, |caps: &Captures| {
                if let Some(key) = caps.name("var") {
                    return self
                        .variables
                        .get(key.as_str().trim())
                        .map(render_value)
                        .unwrap_or_default();
                }
                match (caps.name("node"), caps.name("rest")) {
                    (Some(node), Some(rest)) => {
                        let reference = Reference::from_parts(node.as_str(), rest.as_str());
                        render_value(&lookup_reference(self.outputs, &reference))
                    }
                    _ => String::new(),
                }
            })
            .into_owned()
    }

    /// Recursively resolve strings in arrays and objects; other values pass
    /// through unchanged.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a node configuration, leaving the top-level `condition`
    /// field raw for the condition evaluator.
    pub fn resolve_config(&self, config: &Map<String, Value>) -> Map<String, Value> {
        config
            .iter()
            .map(|(key, value)| {
                let resolved = if key == RAW_CONDITION_KEY {
                    value.clone()
                } else {
                    self.resolve_value(value)
                };
                (key.clone(), resolved)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> HashMap<String, NodeOutput> {
        let mut outputs = HashMap::new();
        outputs.insert(
            "trigger_1".to_string(),
            NodeOutput {
                label: "Inbound".to_string(),
                data: json!({ "phone": "+15550100", "body": { "text": "hi" }, "tags": ["a", "b"] }),
            },
        );
        outputs.insert(
            "lookup".to_string(),
            NodeOutput {
                label: "Lookup".to_string(),
                data: json!({ "success": true, "data": { "name": "Ada", "age": 36 }, "error": null }),
            },
        );
        outputs
    }

    fn variables() -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), json!("Grace")),
            ("count".to_string(), json!(3)),
            ("profile".to_string(), json!({ "vip": true })),
        ])
    }

    #[test]
    fn test_resolve_variable_tokens() {
        let (o, v) = (outputs(), variables());
        let resolver = TemplateResolver::new(&o, &v);
        assert_eq!(resolver.resolve_str("Hello {{var.name}}!"), "Hello Grace!");
        assert_eq!(resolver.resolve_str("n={{ var.count }}"), "n=3");
        assert_eq!(resolver.resolve_str("{{var.profile}}"), r#"{"vip":true}"#);
        assert_eq!(resolver.resolve_str("[{{var.missing}}]"), "[]");
    }

    #[test]
    fn test_resolve_node_reference_by_sanitized_id() {
        let (o, v) = (outputs(), variables());
        let resolver = TemplateResolver::new(&o, &v);
        assert_eq!(resolver.resolve_str("{{@trigger-1:Inbound.phone}}"), "+15550100");
        assert_eq!(resolver.resolve_str("{{@trigger-1:Inbound.body.text}}"), "hi");
        assert_eq!(resolver.resolve_str("{{@trigger-1:Inbound.tags.1}}"), "b");
    }

    #[test]
    fn test_result_envelope_is_unwrapped() {
        let (o, v) = (outputs(), variables());
        let resolver = TemplateResolver::new(&o, &v);
        assert_eq!(resolver.resolve_str("{{@lookup:Lookup.name}}"), "Ada");
        assert_eq!(resolver.resolve_str("{{@lookup:Lookup.success}}"), "true");
        assert_eq!(resolver.resolve_str("{{@lookup:Lookup.data.age}}"), "36");
    }

    #[test]
    fn test_reference_without_path_returns_whole_envelope() {
        let (o, v) = (outputs(), variables());
        let resolver = TemplateResolver::new(&o, &v);
        let rendered = resolver.resolve_str("{{@lookup:Lookup}}");
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({ "success": true, "data": { "name": "Ada", "age": 36 }, "error": null }));

        let reference = Reference {
            node_id: "lookup".into(),
            label: "Lookup".into(),
            path: Vec::new(),
        };
        assert_eq!(lookup_reference(&o, &reference), o["lookup"].data);
    }

    #[test]
    fn test_envelope_shape_detection() {
        assert!(is_result_envelope(&json!({ "success": true, "data": 1, "error": null })));
        assert!(is_result_envelope(&json!({ "success": true, "data": 1 })));
        assert!(!is_result_envelope(&json!({ "success": false, "error": "boom" })));
        assert!(!is_result_envelope(&json!({ "success": true, "data": 1, "extra": 2 })));
        assert!(!is_result_envelope(&json!([true])));

        let mut o = outputs();
        o.insert(
            "partial".to_string(),
            NodeOutput {
                label: "Partial".to_string(),
                data: json!({ "success": true, "data": { "id": 9 }, "extra": "x" }),
            },
        );
        let v = variables();
        let resolver = TemplateResolver::new(&o, &v);
        assert_eq!(resolver.resolve_str("{{@partial:Partial.id}}"), "");
        assert_eq!(resolver.resolve_str("{{@partial:Partial.data.id}}"), "9");
    }

    #[test]
    fn test_unknown_reference_renders_empty() {
        let (o, v) = (outputs(), variables());
        let resolver = TemplateResolver::new(&o, &v);
        assert_eq!(resolver.resolve_str("x{{@nope:Nope.a}}y"), "xy");
        assert_eq!(resolver.resolve_str("x{{@trigger-1:Inbound.a.b.c}}y"), "xy");
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let o = outputs();
        let v = HashMap::from([("evil".to_string(), json!("{{var.name}}"))]);
        let resolver = TemplateResolver::new(&o, &v);
        assert_eq!(resolver.resolve_str("{{var.evil}}"), "{{var.name}}");
    }

    #[test]
    fn test_resolve_config_skips_condition() {
        let (o, v) = (outputs(), variables());
        let resolver = TemplateResolver::new(&o, &v);
        let config = json!({
            "message": "Hi {{var.name}}",
            "condition": "{{@trigger-1:Inbound.phone}} == '+15550100'",
            "nested": { "list": ["{{var.count}}", 7, null] }
        });
        let resolved = resolver.resolve_config(config.as_object().unwrap());

        assert_eq!(resolved["message"], json!("Hi Grace"));
        assert_eq!(resolved["condition"], config["condition"]);
        assert_eq!(resolved["nested"], json!({ "list": ["3", 7, null] }));
    }

    #[test]
    fn test_lookup_reference_is_typed() {
        let o = outputs();
        let reference = Reference {
            node_id: "lookup".into(),
            label: "Lookup".into(),
            path: vec!["age".into()],
        };
        assert_eq!(lookup_reference(&o, &reference), json!(36));
        assert_eq!(reference.display_key(), "lookup:Lookup.age");
    }

    #[test]
    fn test_reference_parts_are_trimmed() {
        let (_, reference) = node_reference_at("{{@ b-2 : Label With Space }}", 0).unwrap();
        assert_eq!(reference.node_id, "b-2");
        assert_eq!(reference.label, "Label With Space");
        assert!(reference.path.is_empty());
        assert_eq!(reference.display_key(), "b-2:Label With Space");
    }

    #[test]
    fn test_node_reference_at_requires_exact_position() {
        let text = "x {{@a:A.v}}";
        assert!(node_reference_at(text, 0).is_none());
        let (end, reference) = node_reference_at(text, 2).unwrap();
        assert_eq!(end, text.len());
        assert_eq!(reference.path, vec!["v"]);
    }
}

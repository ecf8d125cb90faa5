//! Loading graph files and parsing JSON-ish CLI arguments.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use courier_types::workflow::{Edge, Node};
use serde::Deserialize;
use serde_json::Value;

/// A graph as exported from the editor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphFile {
    #[serde(default, alias = "id")]
    pub workflow_id: Option<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

pub async fn load_graph(path: &Path) -> Result<GraphFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read graph file '{}'", path.display()))?;
    let graph: GraphFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid graph JSON in '{}'", path.display()))?;
    Ok(graph)
}

/// Workflow ID from the flag, else the file, else the file stem.
pub fn workflow_id_for(flag: Option<String>, graph: &GraphFile, path: &Path) -> String {
    flag.or_else(|| graph.workflow_id.clone())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "workflow".to_string())
        })
}

/// Parse a `--trigger` style argument.
pub fn parse_json_arg(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str::<Value>(s).with_context(|| "Invalid JSON payload"))
        .transpose()
}

/// Parse `KEY=VALUE` pairs. Values that are not valid JSON become strings.
pub fn parse_vars(pairs: &[String]) -> Result<HashMap<String, Value>> {
    let mut vars = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid --var '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid --var '{pair}': key is empty");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_vars_json_and_strings() {
        let vars = parse_vars(&[
            "count=3".to_string(),
            "name=Ada".to_string(),
            "tags=[\"a\"]".to_string(),
            "eq=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(vars["count"], json!(3));
        assert_eq!(vars["name"], json!("Ada"));
        assert_eq!(vars["tags"], json!(["a"]));
        assert_eq!(vars["eq"], json!("a=b"));
    }

    #[test]
    fn test_parse_vars_rejects_missing_equals() {
        assert!(parse_vars(&["nope".to_string()]).is_err());
        assert!(parse_vars(&["=1".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_load_graph_and_workflow_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboarding.json");
        tokio::fs::write(
            &path,
            r#"{
                "nodes": [
                    { "id": "t", "type": "trigger", "label": "Inbound", "config": {} },
                    { "id": "d", "type": "action", "label": "Wait", "config": { "actionType": "Delay", "delayMs": 5 } }
                ],
                "edges": [ { "source": "t", "target": "d" } ]
            }"#,
        )
        .await
        .unwrap();

        let graph = load_graph(&path).await.unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(workflow_id_for(None, &graph, &path), "onboarding");
        assert_eq!(workflow_id_for(Some("wf-9".into()), &graph, &path), "wf-9");
    }

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(parse_json_arg(None).unwrap(), None);
        assert_eq!(parse_json_arg(Some(r#"{"a":1}"#)).unwrap(), Some(json!({ "a": 1 })));
        assert!(parse_json_arg(Some("{oops")).is_err());
    }
}

//! `courier validate`: structural and per-node checks without running.

use std::path::Path;

use anyhow::{bail, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use super::graph_file::load_graph;
use crate::state::AppState;

pub async fn handle_validate(path: &Path, state: &AppState, json: bool) -> Result<()> {
    let graph = load_graph(path).await?;

    let issues = match state.engine.validate(&graph.nodes, &graph.edges) {
        Ok(issues) => issues,
        Err(err) => {
            if json {
                let out = serde_json::json!({ "valid": false, "error": err.to_string(), "issues": [] });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            bail!("Invalid graph: {err}");
        }
    };

    if json {
        let out = serde_json::json!({
            "valid": issues.is_empty(),
            "issues": issues
                .iter()
                .map(|i| serde_json::json!({ "nodeId": i.node_id, "message": i.message }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if issues.is_empty() {
        println!();
        println!(
            "  {} '{}' is valid ({} nodes, {} edges)",
            style("*").green().bold(),
            path.display(),
            graph.nodes.len(),
            graph.edges.len()
        );
        println!();
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![Cell::new("Node").fg(Color::Cyan), Cell::new("Problem")]);
        for issue in &issues {
            table.add_row(vec![Cell::new(&issue.node_id), Cell::new(&issue.message).fg(Color::Red)]);
        }
        println!();
        println!("{table}");
        println!();
    }

    if !issues.is_empty() {
        bail!("{} configuration issue(s) found", issues.len());
    }
    Ok(())
}

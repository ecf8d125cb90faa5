//! `courier run` and `courier resume`.

use anyhow::{bail, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use courier_core::workflow::executor::WorkflowExecutor;
use courier_types::workflow::{Node, RunOutcome, RunRequest};
use serde_json::Value;

use super::graph_file::{load_graph, parse_json_arg, parse_vars, workflow_id_for};
use super::{ResumeArgs, RunArgs};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(args: RunArgs, state: &AppState, json: bool) -> Result<()> {
    let graph = load_graph(&args.graph).await?;
    let workflow_id = workflow_id_for(args.workflow_id, &graph, &args.graph);
    let execution_id = args
        .execution_id
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let request = RunRequest {
        nodes: graph.nodes.clone(),
        edges: graph.edges,
        trigger_input: parse_json_arg(args.trigger.as_deref())?,
        execution_id: Some(execution_id.clone()),
        workflow_id: Some(workflow_id),
        start_node_ids: Vec::new(),
        initial_variables: parse_vars(&args.vars)?,
    };

    let outcome = state.engine.execute(request).await;
    report(&outcome, &graph.nodes, Some(&execution_id), json)
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub async fn handle_resume(args: ResumeArgs, state: &AppState, json: bool) -> Result<()> {
    let graph = load_graph(&args.graph).await?;
    let trigger = parse_json_arg(args.trigger.as_deref())?;
    let answer = Value::String(args.answer);
    let nodes = graph.nodes.clone();

    let outcome = match (args.conversation_id, args.phone) {
        (Some(id), _) => {
            state
                .engine
                .resume_by_id(graph.nodes, graph.edges, &id, answer, trigger)
                .await?
        }
        (None, Some(phone)) => {
            state
                .engine
                .resume_by_phone(graph.nodes, graph.edges, &phone, answer, trigger)
                .await?
        }
        (None, None) => bail!("Provide a conversation ID or --phone"),
    };

    report(&outcome, &nodes, None, json)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Print an outcome and fail the process when the run did not succeed.
fn report(outcome: &RunOutcome, nodes: &[Node], execution_id: Option<&str>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        print_outcome(outcome, nodes, execution_id);
    }

    if !outcome.success {
        bail!(
            "{}",
            outcome
                .error
                .as_deref()
                .unwrap_or("workflow run did not succeed")
        );
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome, nodes: &[Node], execution_id: Option<&str>) {
    println!();
    let headline = if outcome.paused {
        format!("{} Workflow paused awaiting an answer", style("||").yellow().bold())
    } else if outcome.success {
        format!("{} Workflow completed", style("*").green().bold())
    } else {
        format!("{} Workflow did not succeed", style("x").red().bold())
    };
    println!("  {headline}");
    if let Some(id) = execution_id {
        println!("  Execution: {}", style(id).dim());
    }
    if let Some(error) = &outcome.error {
        println!("  Error: {}", style(error).red());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Label"),
            Cell::new("Status"),
            Cell::new("Output / Error"),
        ]);

    for node in nodes {
        let Some(result) = outcome.results.get(&node.id) else {
            continue;
        };
        let (status, color) = if result.is_skipped() {
            ("skipped", Color::DarkGrey)
        } else if result.success {
            ("ok", Color::Green)
        } else {
            ("failed", Color::Red)
        };
        let detail = match (&result.error, &result.data) {
            (Some(error), _) => error.clone(),
            (None, Some(data)) => data.to_string(),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(&node.label),
            Cell::new(status).fg(color),
            Cell::new(truncate(&detail, 60)),
        ]);
    }

    println!();
    println!("{table}");

    if let (Some(conversation_id), Some(resume_node_id)) =
        (outcome.conversation_id, &outcome.resume_node_id)
    {
        println!();
        println!("  Conversation: {conversation_id}");
        println!("  Resumes at:   {resume_node_id}");
        println!(
            "  Resume with:  {}",
            style(format!("courier resume <graph.json> {conversation_id} --answer \"...\"")).dim()
        );
    }
    println!();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_report_fails_unsuccessful_runs() {
        let failed = RunOutcome {
            success: false,
            error: Some("cycle detected involving node 'a'".into()),
            ..Default::default()
        };
        let err = report(&failed, &[], None, true).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));

        let paused = RunOutcome {
            success: true,
            paused: true,
            ..Default::default()
        };
        assert!(report(&paused, &[], None, true).is_ok());
    }
}

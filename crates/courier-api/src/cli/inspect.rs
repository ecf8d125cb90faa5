//! `courier conversations` and `courier execution`.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use courier_core::repository::pause::PauseStore;
use courier_types::workflow::ExecutionStatus;

use crate::state::AppState;

pub async fn list_conversations(state: &AppState, json: bool) -> Result<()> {
    let conversations = state
        .engine
        .store()
        .list_open_conversations()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list conversations: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
        return Ok(());
    }

    if conversations.is_empty() {
        println!();
        println!("  No open conversations.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Conversation").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Phone"),
            Cell::new("Resumes At"),
            Cell::new("Variable"),
            Cell::new("Opened"),
        ]);

    for c in &conversations {
        table.add_row(vec![
            Cell::new(c.id),
            Cell::new(&c.workflow_id),
            Cell::new(&c.phone),
            Cell::new(&c.resume_node_id),
            Cell::new(&c.variable_key),
            Cell::new(c.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_execution(id: &str, state: &AppState, json: bool) -> Result<()> {
    let record = state
        .engine
        .store()
        .get_execution(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get execution: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Execution '{id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let status = match record.status {
        ExecutionStatus::Success => style(record.status.to_string()).green(),
        ExecutionStatus::Error => style(record.status.to_string()).red(),
        ExecutionStatus::Running | ExecutionStatus::Waiting => style(record.status.to_string()).yellow(),
    };

    println!();
    println!("  Execution: {}", style(&record.execution_id).cyan());
    println!("  Workflow:  {}", record.workflow_id.as_deref().unwrap_or("-"));
    println!("  Status:    {status}");
    println!("  Started:   {}", record.started_at.to_rfc3339());
    println!(
        "  Finished:  {}",
        record
            .finished_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(error) = &record.error {
        println!("  Error:     {}", style(error).red());
    }
    if let Some(output) = &record.output {
        println!();
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    println!();
    Ok(())
}

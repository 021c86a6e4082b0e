//! CLI execution subcommands.
//!
//! submit, submit-file, cancel, status, list and workflows. Each handler
//! prints a styled view by default and a JSON document with `--json`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use duraflow_core::{Codec, DefinitionBuilder, TypedValue};
use duraflow_types::definition::WorkflowDefinition;
use duraflow_types::execution::{Execution, ExecutionStatus};
use duraflow_types::flow::Flow;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Parse one `--arg name=type:value` into its name and decoded value.
///
/// The value text is read the way stored arguments are: strings and paths
/// may be given bare or JSON-quoted, records and `json` as JSON.
pub fn parse_arg(codec: &Codec, raw: &str) -> Result<(String, TypedValue)> {
    let (name, typed) = raw
        .split_once('=')
        .with_context(|| format!("argument '{raw}' is not of the form name=type:value"))?;
    let (tag, value) = typed
        .split_once(':')
        .with_context(|| format!("argument '{raw}' is missing a type (name=type:value)"))?;

    let name = name.trim();
    if name.is_empty() {
        bail!("argument '{raw}' has an empty name");
    }
    if !codec.supports(tag) {
        bail!("argument '{name}' has unsupported type '{tag}'");
    }

    let value = codec
        .decode(Some(tag), Some(value))
        .with_context(|| format!("argument '{name}' is not a valid {tag}"))?;
    Ok((name.to_string(), value))
}

pub async fn submit(
    state: &AppState,
    service: &str,
    method: &str,
    args: &[String],
    with_context: bool,
    json: bool,
) -> Result<()> {
    let mut builder = DefinitionBuilder::new(&state.codec, service, method);
    if with_context {
        builder = builder.context("ctx");
    }
    for raw in args {
        let (name, value) = parse_arg(&state.codec, raw)?;
        builder = builder.arg(name, value)?;
    }
    let definition = builder.build();

    let id = state.client.submit(&definition).await?;
    print_submitted(id, &definition, json)
}

pub async fn submit_file(state: &AppState, path: &Path, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read definition file {}", path.display()))?;
    let definition = WorkflowDefinition::from_bytes(&bytes)
        .with_context(|| format!("invalid workflow definition in {}", path.display()))?;

    let id = state.client.submit(&definition).await?;
    print_submitted(id, &definition, json)
}

fn print_submitted(id: Uuid, definition: &WorkflowDefinition, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "id": id.to_string(),
            "service": definition.service_identifier.name,
            "method": definition.method_name,
            "status": ExecutionStatus::Queued.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Submitted {}/{}",
        style("*").green().bold(),
        style(&definition.service_identifier.name).cyan(),
        style(&definition.method_name).cyan()
    );
    println!("  Execution: {id}");
    println!(
        "  Run it with: {}",
        style("duraflow worker").dim()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn cancel(state: &AppState, id: &Uuid, json: bool) -> Result<()> {
    let execution = state.client.cancel(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution_json(&execution))?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Cancelled execution {}",
        style("*").green().bold(),
        style(short_id(&execution.id)).cyan()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn status(state: &AppState, id: &Uuid, json: bool) -> Result<()> {
    let execution = state.client.status(id).await?;
    let flow = state.client.flow(id).await?;
    let definition = WorkflowDefinition::from_bytes(&execution.definition).ok();

    if json {
        let mut out = execution_json(&execution);
        out["definition"] = serde_json::to_value(&definition)?;
        out["flow"] = serde_json::to_value(&flow)?;
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Execution:").bold(),
        style(execution.id).cyan()
    );
    if let Some(def) = &definition {
        println!(
            "  Workflow: {}/{}",
            style(&def.service_identifier.name).cyan(),
            def.method_name
        );
    }
    println!("  Status: {}", styled_status(execution.status));
    println!("  Queued: {}", execution.queued_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(started) = execution.started_at {
        println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = execution.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(wake_at) = execution.wake_at {
        println!("  Sleeping until: {}", style(wake_at.format("%Y-%m-%d %H:%M:%S")).yellow());
    }
    if let Some(ref err) = execution.error {
        println!("  Error: {}", style(err).red());
    }
    println!();

    if flow.actions.is_empty() {
        println!("  No actions recorded yet.");
        println!();
        return Ok(());
    }

    println!("{}", flow_table(&flow));
    println!();
    Ok(())
}

fn flow_table(flow: &Flow) -> Table {
    let mut actions: Vec<_> = flow.actions.iter().collect();
    actions.sort_by(|a, b| action_order(&a.id).cmp(&action_order(&b.id)));

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Action").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Done"),
            Cell::new("Type"),
            Cell::new("Result"),
            Cell::new("Wake At"),
        ]);

    for action in actions {
        let done = if action.completed {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(&action.id),
            Cell::new(action.name.as_deref().unwrap_or("-")),
            done,
            Cell::new(action.result_type.as_deref().unwrap_or("-")),
            Cell::new(truncate(action.result.as_deref().unwrap_or("-"), 48)),
            Cell::new(
                action
                    .wake_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    table
}

/// Sort key for positional ids: "0.10" after "0.9".
fn action_order(id: &str) -> Vec<u64> {
    id.split('.').map(|part| part.parse().unwrap_or(u64::MAX)).collect()
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, status: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let status = status
        .map(|s| s.parse::<ExecutionStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let executions = state.client.list(status, limit).await?;

    if json {
        let out: Vec<serde_json::Value> = executions.iter().map(execution_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!(
            "  Submit one with: {}",
            style("duraflow submit demo.greeter greet --with-context --arg name=string:Ada").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Queued"),
            Cell::new("Wake At"),
        ]);

    for exec in &executions {
        let workflow = WorkflowDefinition::from_bytes(&exec.definition)
            .map(|d| format!("{}/{}", d.service_identifier.name, d.method_name))
            .unwrap_or_else(|_| "?".to_string());
        let wake_at = exec
            .wake_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(short_id(&exec.id)),
            Cell::new(workflow),
            status_cell(exec.status),
            Cell::new(exec.queued_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(wake_at),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

pub fn workflows(state: &AppState, json: bool) -> Result<()> {
    let catalog = state.registry.catalog();

    if json {
        let out: Vec<serde_json::Value> = catalog
            .iter()
            .map(|(service, methods)| serde_json::json!({ "service": service, "methods": methods }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Service").fg(Color::Cyan), Cell::new("Methods")]);
    for (service, methods) in &catalog {
        table.add_row(vec![Cell::new(service), Cell::new(methods.join(", "))]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn execution_json(exec: &Execution) -> serde_json::Value {
    serde_json::json!({
        "id": exec.id.to_string(),
        "status": exec.status.as_str(),
        "queued_at": exec.queued_at.to_rfc3339(),
        "started_at": exec.started_at.map(|t| t.to_rfc3339()),
        "completed_at": exec.completed_at.map(|t| t.to_rfc3339()),
        "wake_at": exec.wake_at.map(|t| t.to_rfc3339()),
        "error": exec.error,
    })
}

fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn status_cell(status: ExecutionStatus) -> Cell {
    match status {
        ExecutionStatus::Queued => Cell::new("queued").fg(Color::Yellow),
        ExecutionStatus::Running => Cell::new("running").fg(Color::Blue),
        ExecutionStatus::Completed => Cell::new("completed").fg(Color::Green),
        ExecutionStatus::Failed => Cell::new("failed").fg(Color::Red),
        ExecutionStatus::Cancelled => Cell::new("cancelled").fg(Color::DarkYellow),
    }
}

fn styled_status(status: ExecutionStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        ExecutionStatus::Queued => style(text).yellow(),
        ExecutionStatus::Running => style(text).blue(),
        ExecutionStatus::Completed => style(text).green(),
        ExecutionStatus::Failed => style(text).red(),
        ExecutionStatus::Cancelled => style(text).dim(),
    }
}

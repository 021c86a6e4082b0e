//! `worker` and `tick` subcommands.

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use duraflow_core::TickReport;

use crate::state::AppState;

/// Run the scheduler until Ctrl-C.
///
/// The tick in flight when the signal arrives is allowed to finish.
pub async fn run_worker(state: &AppState, json: bool) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("shutdown requested");
        signal_token.cancel();
    });

    if !json {
        println!();
        println!(
            "  {} Worker started (poll every {} ms, up to {} concurrent)",
            style("*").green().bold(),
            state.config.poll_interval().as_millis(),
            state.config.max_concurrent_attempts.max(1)
        );
        println!("  Data: {}", style(state.data_dir.display()).dim());
        println!("  Press {} to stop.", style("Ctrl-C").cyan());
        println!();
    }

    state.scheduler.run(shutdown).await;

    if json {
        println!("{}", serde_json::json!({ "stopped": true }));
    } else {
        println!("  Worker stopped.");
    }
    Ok(())
}

/// Run exactly one tick and print its report.
pub async fn run_tick(state: &AppState, json: bool) -> Result<()> {
    let report = state.scheduler.tick().await?;
    print_report(&report, json)
}

fn print_report(report: &TickReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(report))?);
        return Ok(());
    }

    println!();
    if report.is_idle() {
        println!("  Nothing to do.");
        println!();
        return Ok(());
    }

    println!(
        "  {} Tick attempted {} execution(s)",
        style("*").green().bold(),
        report.attempted()
    );
    println!("  Completed: {}", style(report.completed).green());
    println!("  Suspended: {}", style(report.suspended).yellow());
    println!("  Cancelled: {}", report.canceled);
    println!("  Skipped:   {}", style(report.skipped).dim());
    for failure in &report.failures {
        println!("  Failed:    {}", style(failure).red());
    }
    println!();
    Ok(())
}

fn report_json(report: &TickReport) -> serde_json::Value {
    serde_json::json!({
        "claimed": report.claimed,
        "completed": report.completed,
        "suspended": report.suspended,
        "canceled": report.canceled,
        "skipped": report.skipped,
        "failures": report.failures.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_json_lists_counts() {
        let report = TickReport {
            claimed: 3,
            completed: 1,
            suspended: 1,
            canceled: 1,
            skipped: 2,
            failures: Vec::new(),
        };
        let json = report_json(&report);
        assert_eq!(json["claimed"], 3);
        assert_eq!(json["skipped"], 2);
        assert_eq!(json["failures"].as_array().unwrap().len(), 0);
    }
}

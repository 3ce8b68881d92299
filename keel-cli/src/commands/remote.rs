//! Remote command handlers
//!
//! Talk to a Keel server: submit events, inspect and cancel runs.

use anyhow::Result;
use colored::*;
use keel_client::KeelClient;

use super::display::{colorize_run_status, print_job_result, print_run_summary};
use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::{EventArgs, IdOrPrefix};

pub async fn submit_event(config: &Config, event: &EventArgs) -> Result<i32> {
    let client = KeelClient::new(&config.server_url);
    let event = event.to_event()?;

    let accepted = client.submit_event(&event).await?;

    if !accepted.triggered() {
        println!(
            "{}",
            format!("No pipeline triggered by {} {}.", event.kind, event.git_ref).yellow()
        );
        return Ok(0);
    }

    println!(
        "{}",
        format!("Started {} run(s):", accepted.runs.len()).green().bold()
    );
    println!();
    for run in &accepted.runs {
        print_run_summary(run);
    }
    Ok(0)
}

/// Prints a run; exits with the run's exit code once it has finished
pub async fn show_run(config: &Config, id: &str, with_logs: bool) -> Result<i32> {
    let client = KeelClient::new(&config.server_url);
    let uuid = resolve_run_id(&client, &IdOrPrefix::parse(id)).await?;

    let detail = client.get_run(uuid).await?;
    let summary = &detail.summary;

    println!("{}", "Run Details:".bold());
    println!("  ID:       {}", summary.id.to_string().cyan());
    println!("  Pipeline: {}", summary.pipeline);
    println!("  Status:   {}", colorize_run_status(summary.status));
    println!(
        "  Event:    {} {} on {}",
        detail.event.kind, detail.event.git_ref, detail.event.repository
    );
    println!(
        "  Created:  {}",
        summary.submitted_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    for job in &detail.jobs {
        print_job_result(job, with_logs);
    }

    Ok(summary.exit_code.unwrap_or(0))
}

pub async fn cancel_run(config: &Config, id: &str) -> Result<i32> {
    let client = KeelClient::new(&config.server_url);
    let uuid = resolve_run_id(&client, &IdOrPrefix::parse(id)).await?;

    client.cancel_run(uuid).await?;
    println!("{} {}", "Cancellation requested for run".yellow(), uuid);
    Ok(0)
}

pub async fn list_runs(config: &Config, pipeline: Option<&str>) -> Result<i32> {
    let client = KeelClient::new(&config.server_url);
    let runs = client.list_runs(pipeline).await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in &runs {
            print_run_summary(run);
        }
    }
    Ok(0)
}

//! Terminal rendering of runs and results

use colored::*;
use keel_core::domain::log::{LogEntry, LogLevel};
use keel_core::domain::run::{JobStatus, RunResult, StepOutcome};
use keel_core::dto::run::{RunStatus, RunSummary};

pub fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
    println!("    Pipeline: {}", run.pipeline);
    println!("    Status:   {}", colorize_run_status(run.status));
    println!(
        "    Created:  {}",
        run.submitted_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(code) = run.exit_code {
        println!("    Exit:     {}", code);
    }
    println!();
}

/// Prints one job: its steps, optionally their logs, and why it stopped
pub fn print_job_result(result: &RunResult, with_logs: bool) {
    println!(
        "{} {} {}",
        "Job".bold(),
        result.job().bold(),
        colorize_job_status(result.status())
    );

    let job_logs_end = result
        .steps()
        .first()
        .map(|step| step.log_range.start)
        .unwrap_or(result.logs().len());
    if with_logs {
        for entry in &result.logs()[..job_logs_end] {
            print_log_entry(entry);
        }
    }

    for (index, step) in result.steps().iter().enumerate() {
        let marker = match step.outcome {
            StepOutcome::Succeeded => "✓".green(),
            StepOutcome::Failed => "✗".red(),
            StepOutcome::Cancelled => "■".yellow(),
        };
        let code = step
            .exit_code
            .map(|code| format!("exit {}", code))
            .unwrap_or_else(|| "interrupted".to_string());
        let seconds = step
            .finished_at
            .signed_duration_since(step.started_at)
            .num_milliseconds() as f64
            / 1000.0;

        println!(
            "  {} {} {}",
            marker,
            step.name,
            format!("({}, {:.1}s)", code, seconds).dimmed()
        );

        if with_logs {
            for entry in result.step_logs(index) {
                print!("    ");
                print_log_entry(entry);
            }
        }
    }

    if let Some(failure) = result.failure() {
        println!("  {} {}", "Error:".red().bold(), failure.message.red());
    }
    println!();
}

pub fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.to_string();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

pub fn colorize_run_status(status: RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Running => status_str.cyan(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed | RunStatus::TimedOut => status_str.red(),
        RunStatus::Cancelled => status_str.yellow(),
    }
}

fn colorize_job_status(status: JobStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Succeeded => status_str.green(),
        JobStatus::Failed | JobStatus::TimedOut => status_str.red(),
        JobStatus::Cancelled => status_str.yellow(),
    }
}

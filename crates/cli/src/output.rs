//! Output formatting utilities
//!
//! Stdout carries the verdict only; progress goes to the log.

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use deploy_lib::verify::CheckResult;
use deploy_lib::{CheckStatus, ExitOutcome, RolloutPlan, RunReport, VerificationReport};
use serde::Serialize;
use std::io::IsTerminal;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// One JSON document
    Json,
}

/// Disable colors when stdout is not a terminal
pub fn init_colors() {
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
}

fn marker(outcome: ExitOutcome) -> ColoredString {
    match outcome {
        ExitOutcome::Success => outcome.marker().green().bold(),
        ExitOutcome::Degraded => outcome.marker().yellow().bold(),
        _ => outcome.marker().red().bold(),
    }
}

/// Print the terminal line for a failure that happened before a run started
pub fn print_failure(outcome: ExitOutcome, message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let prefix = match outcome {
                ExitOutcome::PrereqFailure => "prerequisites not met: ",
                ExitOutcome::RolloutOrHealthTimeout => "timeout: ",
                ExitOutcome::FatalApplyFailure => "fatal: ",
                _ => "",
            };
            println!("{} {}{}", marker(outcome), prefix, message);
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "outcome": outcome,
            "exit_code": outcome.exit_code(),
            "message": message,
        })),
    }
}

pub fn print_run_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let line = report.status_line();
            let body = line
                .strip_prefix(report.outcome.marker())
                .unwrap_or(&line)
                .trim_start();
            println!("{} {}", marker(report.outcome), body);
        }
        OutputFormat::Json => print_json(report),
    }
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Check")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Details")]
    message: String,
}

impl From<&CheckResult> for CheckRow {
    fn from(check: &CheckResult) -> Self {
        let status = check.status.to_string();
        Self {
            name: check.name.clone(),
            status: match check.status {
                CheckStatus::Pass => status.green().to_string(),
                CheckStatus::Warn => status.yellow().to_string(),
                CheckStatus::Fail => status.red().to_string(),
            },
            message: check.message.clone(),
        }
    }
}

/// Verdict line for a verification run
pub fn verification_line(report: &VerificationReport) -> (ExitOutcome, String) {
    if !report.success() {
        (
            ExitOutcome::FatalApplyFailure,
            format!(
                "verification failed: {}",
                report.failed_names().join(", ")
            ),
        )
    } else if report.warnings() > 0 {
        (
            ExitOutcome::Degraded,
            format!(
                "verification passed with {} warning(s)",
                report.warnings()
            ),
        )
    } else {
        (
            ExitOutcome::Success,
            format!("verification passed: {} check(s)", report.passed()),
        )
    }
}

/// Recorded outcome of a verification run; warnings do not fail it
pub fn verification_exit(report: &VerificationReport) -> ExitOutcome {
    if report.success() {
        ExitOutcome::Success
    } else {
        ExitOutcome::FatalApplyFailure
    }
}

pub fn print_verification(report: &VerificationReport, format: OutputFormat) {
    let (outcome, line) = verification_line(report);
    match format {
        OutputFormat::Text => {
            let rows: Vec<CheckRow> = report.checks.iter().map(CheckRow::from).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            println!(
                "{} {} ({} passed, {} warnings, {} failed)",
                marker(outcome),
                line,
                report.passed(),
                report.warnings(),
                report.failed()
            );
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "success": report.success(),
            "server_version": report.server_version,
            "checks": report.checks,
            "message": line,
        })),
    }
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Old")]
    old: u32,
    #[tabled(rename = "New")]
    new: u32,
    #[tabled(rename = "Total")]
    total: u32,
    #[tabled(rename = "Ready")]
    ready: u32,
}

pub fn print_plan(plan: &RolloutPlan, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let rows: Vec<StepRow> = plan
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| StepRow {
                    index,
                    action: step.action.to_string(),
                    old: step.old_pods,
                    new: step.new_pods,
                    total: step.total(),
                    ready: step.ready_capacity(),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));

            let capacity = plan.min_ready_capacity();
            let line = format!(
                "{} steps, max {} pods, min ready capacity {}/{}",
                plan.steps.len(),
                plan.max_total(),
                capacity,
                plan.desired
            );
            if capacity >= plan.desired {
                println!("{} {}", "[OK]".green().bold(), line);
            } else {
                println!("{} {}", "[WARN]".yellow().bold(), line);
            }
        }
        OutputFormat::Json => print_json(plan),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{} failed to encode output: {}", "[ERROR]".red().bold(), e),
    }
}

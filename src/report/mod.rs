pub mod markdown;

use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::context::PrContext;
use crate::execute::{ExecutionOutcome, ExecutionResult};
use crate::plan::{ChangePlan, PlanStatus, RiskLevel, StoredChangePlan, ValidationResult};
use crate::preflight::PreflightReport;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Print a stored plan to the terminal, or write its markdown to a file.
#[instrument(skip(stored), fields(plan = %stored.id, status = %stored.status))]
pub fn output_plan(stored: &StoredChangePlan, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing plan to terminal");
            print_stored_plan(stored);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing plan to file");
            std::fs::write(path, markdown::plan_comment(stored))?;
            Ok(())
        }
    }
}

/// Print a context summary:
///
/// PR #42: "Add OAuth2 login flow"
/// Author: alice | Files changed: 7 | +320 -45
pub fn print_context(context: &PrContext, show_diff: bool) {
    println!();
    println!("PR #{}: \"{}\"", context.pr_number, context.title);
    println!(
        "Author: {} | Files changed: {} | +{} -{}",
        context.author, context.total_files, context.total_additions, context.total_deletions
    );
    println!(
        "Reviewed: {} | Skipped: {} | Truncated: {} | Commit: {}{}",
        context.reviewed_files,
        context.skipped_files,
        context.truncated_files,
        short_sha(&context.commit_sha),
        if context.from_cache { " (cached)".dimmed().to_string() } else { String::new() }
    );
    println!();

    for file in &context.files {
        let marker = if file.skipped {
            format!(
                "skipped: {}",
                file.skip_reason.map(|r| r.to_string()).unwrap_or_default()
            )
            .dimmed()
        } else if file.truncated {
            "truncated".yellow()
        } else {
            "".normal()
        };
        println!(
            "  {} {} (+{} -{}) {}",
            file.status, file.filename, file.additions, file.deletions, marker
        );
    }

    if !context.warnings.is_empty() {
        println!();
        for warning in &context.warnings {
            println!("{} {}", "warning:".yellow().bold(), warning);
        }
    }

    if show_diff {
        println!();
        println!("{}", context.diff);
    }
    println!();
}

pub fn print_plan(plan: &ChangePlan) {
    println!();
    println!("═══ {} ═══", plan.title.bold());
    println!("{}", plan.summary);
    println!(
        "Files: {} | Estimated lines changed: {} | Risk: {}",
        plan.total_files,
        plan.estimated_lines_changed,
        colorize_risk(plan.risk_assessment.overall)
    );
    for file in &plan.files {
        println!(
            "  • {} {} [{}] {}",
            file.action,
            file.path,
            colorize_risk(file.risk_level),
            file.description
        );
    }
    println!();
}

pub fn print_validation(validation: &ValidationResult) {
    if validation.violations.is_empty() {
        println!("{} plan is within safety limits", "✓".green().bold());
        return;
    }
    let header = if validation.is_blocking() {
        "Plan blocked by safety limits:".red().bold()
    } else {
        "Plan is within limits, with notes:".yellow().bold()
    };
    println!("{}", header);
    for violation in &validation.violations {
        println!("  • {}", violation);
    }
}

pub fn print_preflight(report: &PreflightReport) {
    if report.is_valid {
        println!("{} {}", "✓".green().bold(), report.summary());
    } else {
        println!("{}", report.summary().red());
    }
}

pub fn print_stored_plan(stored: &StoredChangePlan) {
    print_plan(&stored.plan);
    println!(
        "Plan {} for {}/{}#{} | Status: {} | Requested by {} at {}",
        stored.id,
        stored.owner,
        stored.repo,
        stored.pr_number,
        colorize_status(stored.status),
        stored.triggered_by,
        stored.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let (Some(by), Some(at)) = (&stored.approved_by, stored.approved_at) {
        println!("Approved by {} at {}", by, at.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(number) = stored.result_pr_number {
        println!("Result: PR #{}", number);
    }
    if let Some(error) = &stored.error {
        println!("{} {}", "Note:".yellow().bold(), error);
    }
    for violation in &stored.violations {
        println!("  • {}", violation);
    }
    println!();
}

pub fn print_execution(result: &ExecutionResult) {
    println!();
    match result.outcome() {
        ExecutionOutcome::FullyApplied => println!("{}", "Plan fully applied".green().bold()),
        ExecutionOutcome::PartiallyApplied => {
            println!("{}", "Plan partially applied".yellow().bold())
        }
        ExecutionOutcome::NothingCreated => println!("{}", "Plan not applied".red().bold()),
    }
    if let Some(branch) = &result.branch_name {
        println!("Branch: {}", branch);
    }
    if let (Some(number), Some(url)) = (result.pr_number, &result.pr_url) {
        println!("Pull request: #{} {}", number, url);
    }
    for path in &result.committed_files {
        println!("  {} {}", "committed".green(), path);
    }
    for file in &result.failed_files {
        println!("  {} {}: {}", "not updated".yellow(), file.path, file.reason);
    }
    if let Some(impact) = &result.impact {
        println!("Impact: {}", colorize_risk(impact.risk_level));
        for finding in impact.findings() {
            println!("  • {} ({})", finding.message, finding.file);
        }
    }
    if let Some(error) = &result.error {
        println!("{} {}", "error:".red().bold(), error);
    }
    if let Some(branch) = result.orphaned_branch() {
        println!(
            "{} branch {} was left behind and needs manual cleanup",
            "rollback failed:".red().bold(),
            branch
        );
    } else if result.rollback_performed {
        println!("Rolled back: branch deleted");
    }
    println!();
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Helper to colorize a risk level string for terminal output.
fn colorize_risk(level: RiskLevel) -> colored::ColoredString {
    match level {
        RiskLevel::High => "HIGH".red().bold(),
        RiskLevel::Medium => "MEDIUM".yellow().bold(),
        RiskLevel::Low => "LOW".green().bold(),
    }
}

fn colorize_status(status: PlanStatus) -> colored::ColoredString {
    match status {
        PlanStatus::Pending => "pending".yellow(),
        PlanStatus::Executing => "executing".cyan(),
        PlanStatus::Completed => "completed".green(),
        PlanStatus::Failed => "failed".red(),
        PlanStatus::Rejected => "rejected".dimmed(),
    }
}

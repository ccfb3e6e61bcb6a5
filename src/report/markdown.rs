//! Markdown posted back to the hosting platform: plan comments, outcome
//! comments, check-run summaries and cleanup issues.

use crate::execute::{ExecutionOutcome, ExecutionResult};
use crate::github::{CheckConclusion, CheckRunReport, RepoRef};
use crate::plan::{ChangePlan, StoredChangePlan, ValidationResult, Violation};

/// Name of the check run that carries plan validation results.
pub const CHECK_RUN_NAME: &str = "pr-fixer/change-plan";

/// The comment a plan is posted under, with approval instructions.
pub fn plan_comment(stored: &StoredChangePlan) -> String {
    let plan = &stored.plan;
    let mut md = format!("## Proposed change plan: {}\n\n", plan.title);
    md.push_str(&format!("{}\n\n", plan.summary.trim()));
    if !plan.rationale.trim().is_empty() {
        md.push_str(&format!("**Rationale:** {}\n\n", plan.rationale.trim()));
    }

    md.push_str(&format!(
        "**Files:** {} | **Estimated lines changed:** {} | **Risk:** {}\n\n",
        plan.total_files, plan.estimated_lines_changed, plan.risk_assessment.overall
    ));

    md.push_str("| File | Action | Risk | Description |\n|---|---|---|---|\n");
    for file in &plan.files {
        md.push_str(&format!(
            "| `{}` | {} | {} | {} |\n",
            file.path,
            file.action,
            file.risk_level,
            file.description.replace('|', "\\|").replace('\n', " ")
        ));
    }
    md.push('\n');

    if !plan.risk_assessment.factors.is_empty() {
        md.push_str("**Risk factors:**\n");
        for factor in &plan.risk_assessment.factors {
            md.push_str(&format!("- {}\n", factor));
        }
        md.push('\n');
    }

    if !stored.violations.is_empty() {
        md.push_str("### Safety review\n\n");
        md.push_str(&violation_list(&stored.violations));
        md.push('\n');
    }

    md.push_str(&format!(
        "To apply this plan, a maintainer runs `pr-fixer approve {}`. \
         To discard it, `pr-fixer reject {}`.\n\n",
        stored.id, stored.id
    ));
    md.push_str(&format!(
        "_Requested by @{} with `{}`. Unapproved plans expire automatically._\n",
        stored.triggered_by, stored.command
    ));
    md
}

/// Comment posted instead of a plan when it breaches hard safety limits.
pub fn blocked_plan_comment(plan: &ChangePlan, validation: &ValidationResult) -> String {
    let mut md = format!("## Change plan blocked: {}\n\n", plan.title);
    md.push_str(&format!(
        "The generated plan touches {} file(s) and about {} line(s). \
         It was not saved and cannot be approved:\n\n",
        plan.total_files, plan.estimated_lines_changed
    ));
    md.push_str(&violation_list(&validation.violations));
    md.push_str("\nNarrow the request (fewer files or a smaller fix) and ask again.\n");
    md
}

fn violation_list(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("- {}\n", v.message))
        .collect()
}

/// Check-run content for a validated plan.
pub fn validation_check(validation: &ValidationResult) -> CheckRunReport {
    if validation.is_blocking() {
        CheckRunReport {
            name: CHECK_RUN_NAME.to_string(),
            conclusion: CheckConclusion::Failure,
            title: format!(
                "Change plan exceeds safety limits ({} violation(s))",
                validation.violations.len()
            ),
            summary: violation_list(&validation.violations),
        }
    } else {
        let summary = if validation.violations.is_empty() {
            "All safety checks passed.".to_string()
        } else {
            format!(
                "Within safety limits, with notes:\n\n{}",
                violation_list(&validation.violations)
            )
        };
        CheckRunReport {
            name: CHECK_RUN_NAME.to_string(),
            conclusion: CheckConclusion::Success,
            title: "Change plan is within safety limits".to_string(),
            summary,
        }
    }
}

/// Comment posted on the source PR after an approved plan ran.
pub fn outcome_comment(stored: &StoredChangePlan, result: &ExecutionResult) -> String {
    let mut md = String::new();
    match result.outcome() {
        ExecutionOutcome::FullyApplied => {
            md.push_str(&format!(
                "Change plan `{}` was applied: {}\n",
                stored.id,
                pr_link(result)
            ));
        }
        ExecutionOutcome::PartiallyApplied if result.success => {
            md.push_str(&format!(
                "Change plan `{}` was partially applied: {}\n\n",
                stored.id,
                pr_link(result)
            ));
            md.push_str("Files not updated:\n");
            for file in &result.failed_files {
                md.push_str(&format!("- `{}`: {}\n", file.path, file.reason));
            }
        }
        _ => {
            md.push_str(&format!("Change plan `{}` failed.\n\n", stored.id));
            if let Some(error) = &result.error {
                md.push_str(&format!("```\n{}\n```\n\n", error.trim()));
            }
            if let Some(branch) = result.orphaned_branch() {
                md.push_str(&format!(
                    "Rollback failed: branch `{}` was left behind and needs manual cleanup.\n",
                    branch
                ));
            } else if result.rollback_performed {
                md.push_str("The working branch was deleted; nothing was left behind.\n");
            } else {
                md.push_str("No branch was created.\n");
            }
        }
    }
    md
}

fn pr_link(result: &ExecutionResult) -> String {
    match (result.pr_number, &result.pr_url) {
        (Some(number), Some(url)) => format!("[#{}]({})", number, url),
        (Some(number), None) => format!("#{}", number),
        _ => "pull request opened".to_string(),
    }
}

/// Title and body of the issue opened when rollback leaves a branch behind.
pub fn orphaned_branch_issue(
    repo: &RepoRef,
    stored: &StoredChangePlan,
    branch: &str,
    rollback_error: Option<&str>,
) -> (String, String) {
    let title = format!("Clean up orphaned branch {}", branch);
    let mut body = format!(
        "Executing change plan `{}` (from #{} in {}) failed and the branch \
         `{}` could not be deleted automatically.\n\n",
        stored.id, stored.pr_number, repo, branch
    );
    if let Some(error) = rollback_error {
        body.push_str(&format!("Delete error: `{}`\n\n", error));
    }
    body.push_str("Please delete the branch manually once it has been checked.\n");
    (title, body)
}

use super::impact::ImpactReport;
use super::FailedFile;
use crate::plan::ChangePlan;

/// Everything the pull-request body reports about one execution.
pub struct BodyInput<'a> {
    pub plan: &'a ChangePlan,
    pub source_pr: Option<u64>,
    pub committed: &'a [String],
    pub failed: &'a [FailedFile],
    pub impact: Option<&'a ImpactReport>,
}

pub fn render_pr_body(input: &BodyInput<'_>) -> String {
    let plan = input.plan;
    let mut body = String::new();

    body.push_str("## Summary\n\n");
    body.push_str(plan.summary.trim());
    body.push_str("\n\n");
    if !plan.rationale.trim().is_empty() {
        body.push_str(&format!("**Rationale:** {}\n\n", plan.rationale.trim()));
    }
    match input.source_pr {
        Some(number) => body.push_str(&format!(
            "Applies change plan `{}` proposed on #{}.\n\n",
            plan.id, number
        )),
        None => body.push_str(&format!("Applies change plan `{}`.\n\n", plan.id)),
    }

    body.push_str("## Files changed\n\n");
    for path in input.committed {
        let description = plan
            .files
            .iter()
            .find(|f| &f.path == path)
            .map(|f| format!(" ({}): {}", f.action, f.description.trim()))
            .unwrap_or_default();
        body.push_str(&format!("- `{}`{}\n", path, description));
    }
    body.push('\n');

    if !input.failed.is_empty() {
        body.push_str("## Files not updated\n\n");
        body.push_str("These changes from the plan were not applied and need manual follow-up:\n\n");
        for file in input.failed {
            body.push_str(&format!("- `{}`: {}\n", file.path, file.reason));
        }
        body.push('\n');
    }

    body.push_str("## Risk\n\n");
    body.push_str(&format!(
        "Plan risk: **{}**\n",
        plan.risk_assessment.overall
    ));
    for factor in &plan.risk_assessment.factors {
        body.push_str(&format!("- {}\n", factor));
    }
    if !plan.risk_assessment.mitigations.is_empty() {
        body.push_str("\nMitigations:\n");
        for mitigation in &plan.risk_assessment.mitigations {
            body.push_str(&format!("- {}\n", mitigation));
        }
    }
    body.push('\n');
    match input.impact {
        Some(impact) => {
            body.push_str(&format!("Impact analysis: **{}**\n", impact.risk_level));
            let mut any = false;
            for finding in impact.findings() {
                any = true;
                let location = match finding.line {
                    Some(line) => format!("`{}`:{}", finding.file, line),
                    None => format!("`{}`", finding.file),
                };
                body.push_str(&format!(
                    "- [{}] {}: {}\n",
                    finding.severity, location, finding.message
                ));
            }
            if !any {
                body.push_str("- No risky patterns found in the committed changes.\n");
            }
        }
        None => body.push_str("Impact analysis was not run.\n"),
    }
    body.push('\n');

    if !plan.testing_recommendations.is_empty() {
        body.push_str("## Testing\n\n");
        for recommendation in &plan.testing_recommendations {
            body.push_str(&format!("- {}\n", recommendation));
        }
        body.push('\n');
    }

    if !plan.rollback_plan.trim().is_empty() {
        body.push_str(&format!("**Rollback:** {}\n\n", plan.rollback_plan.trim()));
    }

    body.push_str("## Reviewer checklist\n\n");
    body.push_str("- [ ] Changes match the summary above\n");
    body.push_str("- [ ] CI passes (preflight only checked syntax)\n");
    body.push_str("- [ ] No unrelated files were modified\n");
    body.push_str("- [ ] Flagged risk areas were reviewed\n");
    if !input.failed.is_empty() {
        body.push_str("- [ ] Files not updated were handled manually\n");
    }
    body.push_str("\n---\nGenerated from an approved change plan. Never merged automatically.\n");
    body
}

#[cfg(test)]
mod memory;
pub mod store;
pub mod types;

#[cfg(test)]
pub use memory::MemoryPlanStore;
pub use store::{PlanStatus, PlanStore, StatusUpdate, StoredChangePlan};
#[cfg(test)]
pub use types::RiskAssessment;
pub use types::{
    ChangePlan, FileAction, FileChange, RiskLevel, SafetyLimits, ValidationResult, Violation,
    ViolationKind,
};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No JSON object found in response")]
    NoJson,

    #[error("Plan does not match the expected schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Plan contains no file changes")]
    NoFiles,

    #[error("Invalid file path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Plan field {0} must not be empty")]
    EmptyField(&'static str),
}

/// Pull the JSON object out of a model reply: bare JSON, a fenced block, or
/// the outermost braces of surrounding prose.
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn check_path(path: &str) -> Result<(), PlanError> {
    let invalid = |reason| PlanError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.starts_with('/') || path.starts_with('\\') || path.contains(':') {
        return Err(invalid("path must be relative to the repository root"));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(invalid("path must not contain '..'"));
    }
    Ok(())
}

/// Parse and schema-check a change plan produced by a model.
///
/// Unknown `action`/`riskLevel` values and missing required fields are
/// rejected. `totalFiles` is recomputed from `files`.
pub fn parse_plan(text: &str) -> Result<ChangePlan, PlanError> {
    let json = extract_json(text).ok_or(PlanError::NoJson)?;
    let mut plan: ChangePlan = serde_json::from_str(json)?;

    if plan.title.trim().is_empty() {
        return Err(PlanError::EmptyField("title"));
    }
    if plan.files.is_empty() {
        return Err(PlanError::NoFiles);
    }
    for file in &plan.files {
        check_path(&file.path)?;
    }

    if plan.total_files != plan.files.len() {
        warn!(
            reported = plan.total_files,
            actual = plan.files.len(),
            "plan totalFiles disagrees with file list, using file list"
        );
        plan.total_files = plan.files.len();
    }
    Ok(plan)
}

/// Check a plan against safety limits. One violation per breached rule.
pub fn validate_plan(plan: &ChangePlan, limits: &SafetyLimits) -> ValidationResult {
    let mut violations = Vec::new();

    if plan.total_files > limits.max_files {
        violations.push(Violation {
            kind: ViolationKind::FileCount,
            message: format!(
                "Plan modifies {} files, exceeding the limit of {}",
                plan.total_files, limits.max_files
            ),
        });
    }

    if plan.estimated_lines_changed > limits.max_lines_changed {
        violations.push(Violation {
            kind: ViolationKind::LinesChanged,
            message: format!(
                "Plan changes an estimated {} lines, exceeding the limit of {}",
                plan.estimated_lines_changed, limits.max_lines_changed
            ),
        });
    }

    let high_risk: Vec<&str> = plan
        .files
        .iter()
        .filter(|f| f.risk_level == RiskLevel::High)
        .map(|f| f.path.as_str())
        .collect();
    if !high_risk.is_empty() {
        violations.push(Violation {
            kind: ViolationKind::HighRiskFiles,
            message: format!("High-risk changes need careful review: {}", high_risk.join(", ")),
        });
    }

    ValidationResult {
        valid: violations.is_empty(),
        violations,
    }
}

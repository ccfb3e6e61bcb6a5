use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk level for a file change or a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Modify,
    Create,
    Delete,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileAction::Modify => write!(f, "modify"),
            FileAction::Create => write!(f, "create"),
            FileAction::Delete => write!(f, "delete"),
        }
    }
}

/// One proposed edit within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub action: FileAction,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Identifiers of the lint findings or issues this change resolves
    #[serde(default)]
    pub issues_addressed: Vec<String>,
    pub risk_level: RiskLevel,
}

impl FileChange {
    /// Whether the execution engine can write this change as a file commit.
    pub fn is_applicable(&self) -> bool {
        matches!(self.action, FileAction::Modify | FileAction::Create)
            && self.proposed_content.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub overall: RiskLevel,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub mitigations: Vec<String>,
}

/// A structured, AI-proposed set of file edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlan {
    #[serde(default = "new_plan_id")]
    pub id: String,
    pub title: String,
    pub summary: String,
    pub rationale: String,
    pub files: Vec<FileChange>,
    pub total_files: usize,
    pub estimated_lines_changed: usize,
    pub risk_assessment: RiskAssessment,
    #[serde(default)]
    pub testing_recommendations: Vec<String>,
    #[serde(default)]
    pub rollback_plan: String,
}

pub fn new_plan_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Per-repository ceilings a plan must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyLimits {
    pub max_files: usize,
    pub max_lines_changed: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_lines_changed: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    FileCount,
    LinesChanged,
    /// Informational: the plan touches files rated high risk
    HighRiskFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    /// True when a hard safety limit is breached; such plans never reach approval.
    pub fn is_blocking(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.kind != ViolationKind::HighRiskFiles)
    }
}

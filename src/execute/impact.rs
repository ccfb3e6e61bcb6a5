//! Pattern-based impact analysis of committed changes.
//!
//! Scans the lines each change adds for risky constructs and flags paths that
//! deserve a second reviewer. Heuristic only; a clean report is not a review.

use diffy::{create_patch, Line};
use serde::Serialize;

use crate::plan::RiskLevel;

/// Share of the original file removed before a change counts as a rewrite.
const REWRITE_RATIO: f64 = 0.5;
/// Files shorter than this are never reported as rewrites.
const REWRITE_MIN_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub message: String,
    pub file: String,
    pub line: Option<usize>,
    pub severity: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileImpact {
    pub path: String,
    pub added_lines: usize,
    pub removed_lines: usize,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactReport {
    pub risk_level: RiskLevel,
    pub files: Vec<FileImpact>,
}

impl ImpactReport {
    pub fn from_files(files: Vec<FileImpact>) -> Self {
        let findings: Vec<&Finding> = files.iter().flat_map(|f| &f.findings).collect();
        Self {
            risk_level: determine_risk_level(&findings),
            files,
        }
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.files.iter().flat_map(|f| &f.findings)
    }
}

/// Overall risk: HIGH if any finding is HIGH, MEDIUM if any is MEDIUM, else LOW.
pub fn determine_risk_level(findings: &[&Finding]) -> RiskLevel {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(RiskLevel::Low)
}

/// Diff `original` (empty for new files) against `proposed` and scan the result.
pub fn analyze_file(path: &str, original: Option<&str>, proposed: &str) -> FileImpact {
    let original = original.unwrap_or("");
    let patch = create_patch(original, proposed);

    let mut added = Vec::new();
    let mut removed_lines = 0;
    for hunk in patch.hunks() {
        let mut new_line = hunk.new_range().start();
        for line in hunk.lines() {
            match line {
                Line::Context(_) => new_line += 1,
                Line::Insert(text) => {
                    added.push((new_line, text.trim_end_matches(['\n', '\r'])));
                    new_line += 1;
                }
                Line::Delete(_) => removed_lines += 1,
            }
        }
    }

    let mut findings = Vec::new();
    findings.extend(check_sensitive_path(path));
    for (line, content) in &added {
        findings.extend(check_added_line(path, *line, content));
    }
    findings.extend(check_rewrite(path, original, removed_lines));

    FileImpact {
        path: path.to_string(),
        added_lines: added.len(),
        removed_lines,
        findings,
    }
}

fn check_sensitive_path(path: &str) -> Option<Finding> {
    let lower = path.to_ascii_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);

    let (message, severity) = if lower.starts_with(".github/workflows/")
        || lower.starts_with(".gitlab-ci")
        || file_name == "jenkinsfile"
    {
        ("CI pipeline definition changed", RiskLevel::High)
    } else if file_name.starts_with(".env") {
        ("Environment file changed", RiskLevel::High)
    } else if ["auth", "security", "crypto", "permission"]
        .iter()
        .any(|p| lower.contains(p))
    {
        ("Security-sensitive path changed", RiskLevel::High)
    } else if lower.contains("migration") {
        ("Database migration changed", RiskLevel::Medium)
    } else if [
        "cargo.toml",
        "cargo.lock",
        "package.json",
        "package-lock.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        "requirements.txt",
        "go.mod",
        "go.sum",
        "gemfile",
        "gemfile.lock",
    ]
    .contains(&file_name)
    {
        ("Dependency manifest or lockfile changed", RiskLevel::Medium)
    } else {
        return None;
    };

    Some(Finding {
        message: message.to_string(),
        file: path.to_string(),
        line: None,
        severity,
    })
}

fn check_added_line(path: &str, line: usize, content: &str) -> Option<Finding> {
    let trimmed = content.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with('#') {
        return None;
    }

    let (message, severity) = if let Some(message) = hardcoded_secret(content) {
        (message, RiskLevel::High)
    } else if content.contains("shell=True")
        || content.contains("shell = True")
        || content.contains("child_process")
        || (content.contains("Command::new") && content.contains("format!"))
        || content.contains("os.system(")
    {
        ("Shell command execution added", RiskLevel::High)
    } else if content.contains("eval(") || content.contains("exec(") {
        ("eval/exec usage added", RiskLevel::High)
    } else if content.contains("unsafe {") || content.contains("unsafe fn") {
        ("New unsafe block introduced", RiskLevel::Medium)
    } else {
        return None;
    };

    Some(Finding {
        message: message.to_string(),
        file: path.to_string(),
        line: Some(line),
        severity,
    })
}

/// `name = "literal"` (or `name: "literal"`) assignments to secret-looking names.
fn hardcoded_secret(content: &str) -> Option<&'static str> {
    if let Some(pos) = content.find("AKIA") {
        let key: String = content[pos..]
            .chars()
            .take_while(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            .collect();
        if key.len() == 20 {
            return Some("AWS access key added");
        }
    }

    let lower = content.to_ascii_lowercase();
    for (name, message) in [
        ("password", "Hardcoded password added"),
        ("api_key", "Hardcoded API key added"),
        ("apikey", "Hardcoded API key added"),
        ("secret", "Hardcoded secret added"),
        ("token", "Hardcoded token added"),
    ] {
        let Some(pos) = lower.find(name) else {
            continue;
        };
        let rest = &lower[pos + name.len()..];
        let value = match rest.find('=') {
            Some(eq)
                if !rest[eq + 1..].starts_with('=')
                    && !rest[..eq].contains([';', '(', ')']) =>
            {
                &rest[eq + 1..]
            }
            _ => {
                let after_name = rest
                    .trim_start_matches(|c: char| c.is_alphanumeric() || c == '_')
                    .trim_start_matches(['"', '\''])
                    .trim_start();
                match after_name.strip_prefix(':') {
                    Some(value) => value,
                    None => continue,
                }
            }
        };
        let value = value.trim_start();
        let quoted = (value.starts_with('"') && !value.starts_with("\"\""))
            || (value.starts_with('\'') && !value.starts_with("''"));
        if quoted {
            return Some(message);
        }
    }
    None
}

fn check_rewrite(path: &str, original: &str, removed_lines: usize) -> Option<Finding> {
    let original_lines = original.lines().count();
    if original_lines < REWRITE_MIN_LINES {
        return None;
    }
    let ratio = removed_lines as f64 / original_lines as f64;
    (ratio >= REWRITE_RATIO).then(|| Finding {
        message: format!(
            "Large rewrite: {} of {} original lines removed",
            removed_lines, original_lines
        ),
        file: path.to_string(),
        line: None,
        severity: RiskLevel::Medium,
    })
}

//! Git execution engine: turns an approved plan into a branch, per-file
//! commits and a pull request, deleting the branch again when nothing useful
//! was left on it.

pub mod body;
pub mod impact;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::github::{FileWrite, GitHost, GitHubError, NewPullRequest, RepoRef};
use crate::plan::{ChangePlan, FileAction, FileChange};
use crate::preflight::{self, PreflightReport};
use body::{render_pr_body, BodyInput};
use impact::{analyze_file, ImpactReport};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("GitHub request failed: {0}")]
    GitHub(#[from] GitHubError),

    #[error("No files were committed ({0} failed)")]
    NothingCommitted(usize),
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub preflight: bool,
    pub impact_analysis: bool,
    pub branch_prefix: String,
    pub labels: Vec<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            preflight: true,
            impact_analysis: true,
            branch_prefix: "ai-fix".to_string(),
            labels: vec!["ai-generated".to_string()],
        }
    }
}

impl ExecutionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preflight: config.execution.preflight,
            impact_analysis: config.execution.impact_analysis,
            branch_prefix: config.execution.branch_prefix.clone(),
            labels: config.execution.labels.clone(),
        }
    }
}

/// A plan entry that did not make it onto the branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: String,
    pub reason: String,
}

/// What an execution left behind on the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// No branch or pull request exists (never created, or rolled back).
    NothingCreated,
    /// A pull request exists but some files were not applied, or a branch
    /// was left behind because rollback failed.
    PartiallyApplied,
    /// Every applicable change is committed and the pull request is open.
    FullyApplied,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub branch_name: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub committed_files: Vec<String>,
    pub failed_files: Vec<FailedFile>,
    pub error: Option<String>,
    pub rollback_performed: bool,
    /// Set when the branch delete itself failed; the branch is orphaned.
    pub rollback_error: Option<String>,
    pub preflight: Option<PreflightReport>,
    pub impact: Option<ImpactReport>,
}

impl ExecutionResult {
    fn new() -> Self {
        Self {
            success: false,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            committed_files: Vec::new(),
            failed_files: Vec::new(),
            error: None,
            rollback_performed: false,
            rollback_error: None,
            preflight: None,
            impact: None,
        }
    }

    pub fn outcome(&self) -> ExecutionOutcome {
        if self.success {
            if self.failed_files.is_empty() {
                ExecutionOutcome::FullyApplied
            } else {
                ExecutionOutcome::PartiallyApplied
            }
        } else if self.orphaned_branch().is_some() {
            ExecutionOutcome::PartiallyApplied
        } else {
            ExecutionOutcome::NothingCreated
        }
    }

    /// Branch that still exists after a failed run and needs manual cleanup.
    pub fn orphaned_branch(&self) -> Option<&str> {
        if self.success || self.rollback_performed {
            return None;
        }
        self.branch_name.as_deref()
    }
}

pub struct ExecutionEngine {
    host: Arc<dyn GitHost>,
    options: ExecutionOptions,
}

impl ExecutionEngine {
    pub fn new(host: Arc<dyn GitHost>, options: ExecutionOptions) -> Self {
        Self { host, options }
    }

    /// Apply `plan` on a new branch cut from `base_branch` and open a pull
    /// request back into it. Never panics on host failures; everything is
    /// reported through the returned [`ExecutionResult`].
    #[instrument(skip(self, plan), fields(plan = %plan.id, base = base_branch))]
    pub async fn execute(
        &self,
        repo: &RepoRef,
        plan: &ChangePlan,
        base_branch: &str,
        source_pr: Option<u64>,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::new();

        if self.options.preflight {
            let report = preflight::check_plan(plan);
            let valid = report.is_valid;
            if !valid {
                warn!(
                    failed = report.failed_files().count(),
                    "syntax preflight failed, nothing written"
                );
                result.error = Some(report.summary());
            }
            result.preflight = Some(report);
            if !valid {
                return result;
            }
        }

        let base_sha = match self.host.get_branch_sha(repo, base_branch).await {
            Ok(sha) => sha,
            Err(err) => {
                error!(%err, "could not resolve base branch");
                result.error = Some(format!("Failed to resolve base branch {}: {}", base_branch, err));
                return result;
            }
        };

        let branch = branch_name(&self.options.branch_prefix, &plan.id, Utc::now());
        if let Err(err) = self.host.create_branch(repo, &branch, &base_sha).await {
            error!(%err, branch = %branch, "could not create branch");
            result.error = Some(format!("Failed to create branch {}: {}", branch, err));
            return result;
        }
        info!(branch = %branch, sha = %base_sha, "branch created");
        result.branch_name = Some(branch.clone());

        match self
            .apply(repo, plan, &branch, base_branch, &base_sha, source_pr, &mut result)
            .await
        {
            Ok(()) => result.success = true,
            Err(err) => {
                error!(%err, "execution failed, rolling back");
                result.error = Some(err.to_string());
                self.rollback(repo, &branch, &mut result).await;
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        repo: &RepoRef,
        plan: &ChangePlan,
        branch: &str,
        base_branch: &str,
        base_sha: &str,
        source_pr: Option<u64>,
        result: &mut ExecutionResult,
    ) -> Result<(), ExecuteError> {
        for change in &plan.files {
            let Some(content) = applicable_content(change, result) else {
                continue;
            };
            let write = FileWrite {
                path: change.path.clone(),
                content: content.to_string(),
                message: commit_message(change, &plan.id),
                branch: branch.to_string(),
            };
            match self.host.create_or_update_file(repo, &write).await {
                Ok(()) => {
                    debug!(path = %change.path, "file committed");
                    result.committed_files.push(change.path.clone());
                }
                Err(err) => {
                    warn!(path = %change.path, %err, "file commit failed, continuing");
                    result.failed_files.push(FailedFile {
                        path: change.path.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if result.committed_files.is_empty() {
            return Err(ExecuteError::NothingCommitted(result.failed_files.len()));
        }

        if self.options.impact_analysis {
            result.impact = self.analyze_impact(repo, plan, base_sha, &result.committed_files).await;
        }

        let body = render_pr_body(&BodyInput {
            plan,
            source_pr,
            committed: &result.committed_files,
            failed: &result.failed_files,
            impact: result.impact.as_ref(),
        });
        let pull = NewPullRequest {
            title: plan.title.clone(),
            head: branch.to_string(),
            base: base_branch.to_string(),
            body,
        };
        let created = self.host.create_pull_request(repo, &pull).await?;
        info!(pr = created.number, url = %created.html_url, "pull request opened");
        result.pr_number = Some(created.number);
        result.pr_url = Some(created.html_url);

        if !self.options.labels.is_empty() {
            if let Err(err) = self
                .host
                .add_labels(repo, created.number, &self.options.labels)
                .await
            {
                warn!(%err, "failed to add labels");
            }
        }
        Ok(())
    }

    /// Best effort: any failure fetching originals drops the whole analysis.
    async fn analyze_impact(
        &self,
        repo: &RepoRef,
        plan: &ChangePlan,
        base_sha: &str,
        committed: &[String],
    ) -> Option<ImpactReport> {
        let mut files = Vec::new();
        for path in committed {
            let Some(change) = plan.files.iter().find(|f| &f.path == path) else {
                continue;
            };
            let Some(proposed) = change.proposed_content.as_deref() else {
                continue;
            };
            let original = match (&change.original_content, change.action) {
                (Some(original), _) => Some(original.clone()),
                (None, FileAction::Create) => None,
                (None, _) => match self.host.get_file_content(repo, path, base_sha).await {
                    Ok(content) => content,
                    Err(err) => {
                        warn!(%err, path = %path, "impact analysis skipped");
                        return None;
                    }
                },
            };
            files.push(analyze_file(path, original.as_deref(), proposed));
        }
        let report = ImpactReport::from_files(files);
        debug!(risk = %report.risk_level, findings = report.findings().count(), "impact analysis done");
        Some(report)
    }

    async fn rollback(&self, repo: &RepoRef, branch: &str, result: &mut ExecutionResult) {
        match self.host.delete_branch(repo, branch).await {
            Ok(()) => {
                info!(branch, "rollback: branch deleted");
                result.rollback_performed = true;
            }
            Err(err) => {
                error!(branch, %err, "rollback failed, branch left behind");
                result.rollback_error = Some(err.to_string());
            }
        }
    }
}

/// Proposed content for changes the engine writes. Everything else is
/// recorded as not updated.
fn applicable_content<'a>(change: &'a FileChange, result: &mut ExecutionResult) -> Option<&'a str> {
    let reason = match (change.action, change.proposed_content.as_deref()) {
        (FileAction::Modify | FileAction::Create, Some(content)) => return Some(content),
        (FileAction::Delete, _) => "file deletions are not applied automatically",
        (_, None) => "no proposed content in the plan",
    };
    result.failed_files.push(FailedFile {
        path: change.path.clone(),
        reason: reason.to_string(),
    });
    None
}

/// `{prefix}/{plan-id}-{yyyymmddHHMMSS}`, with the id reduced to
/// branch-safe characters.
pub fn branch_name(prefix: &str, plan_id: &str, now: DateTime<Utc>) -> String {
    let id: String = plan_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let prefix = prefix.trim_matches('/');
    let stamp = now.format("%Y%m%d%H%M%S");
    if prefix.is_empty() {
        format!("{}-{}", id, stamp)
    } else {
        format!("{}/{}-{}", prefix, id, stamp)
    }
}

fn commit_message(change: &FileChange, plan_id: &str) -> String {
    let summary = change
        .description
        .lines()
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match change.action {
            FileAction::Create => format!("Add {}", change.path),
            _ => format!("Update {}", change.path),
        });
    let summary: String = summary.chars().take(72).collect();
    format!("{}\n\nChange plan: {}", summary, plan_id)
}

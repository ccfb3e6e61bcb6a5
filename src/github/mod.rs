pub mod client;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use client::GitHubClient;
pub use types::{
    CheckConclusion, CheckRun, CheckRunReport, CreatedComment, CreatedPullRequest, FileWrite,
    NewPullRequest, PrUrl, PullRequestFile, PullRequestMeta, RepoRef,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid PR URL: {0}")]
    InvalidUrl(String),

    #[error("GitHub token not found in environment")]
    MissingToken,

    #[error("Failed to decode file content: {0}")]
    Decode(String),
}

/// Operations consumed from the git hosting platform.
///
/// Everything the pipeline reads or writes on the remote goes through this
/// trait, so the assembler and the execution engine can be driven by an
/// in-process fake in tests.
#[async_trait]
pub trait GitHost: Send + Sync {
    async fn get_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestMeta, GitHubError>;

    /// One page of the changed-files listing. Pages are 1-based.
    async fn list_pull_request_files(
        &self,
        repo: &RepoRef,
        number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<PullRequestFile>, GitHubError>;

    /// File content at `git_ref`, or `None` if the file does not exist there.
    async fn get_file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, GitHubError>;

    async fn get_branch_sha(&self, repo: &RepoRef, branch: &str) -> Result<String, GitHubError>;

    async fn create_branch(
        &self,
        repo: &RepoRef,
        name: &str,
        from_sha: &str,
    ) -> Result<(), GitHubError>;

    async fn create_or_update_file(
        &self,
        repo: &RepoRef,
        write: &FileWrite,
    ) -> Result<(), GitHubError>;

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> Result<CreatedPullRequest, GitHubError>;

    async fn add_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError>;

    async fn delete_branch(&self, repo: &RepoRef, name: &str) -> Result<(), GitHubError>;

    async fn list_check_runs(&self, repo: &RepoRef, sha: &str)
        -> Result<Vec<CheckRun>, GitHubError>;

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        sha: &str,
        report: &CheckRunReport,
    ) -> Result<u64, GitHubError>;

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        id: u64,
        report: &CheckRunReport,
    ) -> Result<(), GitHubError>;

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<CreatedComment, GitHubError>;

    async fn create_issue(&self, repo: &RepoRef, title: &str, body: &str)
        -> Result<u64, GitHubError>;

    /// Permission level of `user` ("admin", "maintain", "write", "triage", "read", "none").
    async fn get_collaborator_permission(
        &self,
        repo: &RepoRef,
        user: &str,
    ) -> Result<String, GitHubError>;
}

/// Parse a GitHub PR URL into its component parts.
/// Expected format: https://github.com/{owner}/{repo}/pull/{number}
pub fn parse_pr_url(url: &str) -> Result<PrUrl, GitHubError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| GitHubError::InvalidUrl(url.to_string()))?;

    if parsed.host_str() != Some("github.com") {
        return Err(GitHubError::InvalidUrl(url.to_string()));
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(|| GitHubError::InvalidUrl(url.to_string()))?
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() != 4 || segments[2] != "pull" {
        return Err(GitHubError::InvalidUrl(url.to_string()));
    }

    let pr_number = segments[3]
        .parse::<u64>()
        .map_err(|_| GitHubError::InvalidUrl(url.to_string()))?;

    Ok(PrUrl {
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        pr_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_pr_url() {
        let url = parse_pr_url("https://github.com/org/repo/pull/42").unwrap();
        assert_eq!(url.owner, "org");
        assert_eq!(url.repo, "repo");
        assert_eq!(url.pr_number, 42);
        assert_eq!(url.repo_ref().to_string(), "org/repo");
    }

    #[test]
    fn test_parse_pr_url_with_trailing_slash() {
        let url = parse_pr_url("https://github.com/org/repo/pull/7/").unwrap();
        assert_eq!(url.pr_number, 7);
    }

    #[test]
    fn test_parse_invalid_pr_url() {
        assert!(parse_pr_url("https://example.com").is_err());
        assert!(parse_pr_url("not-a-url").is_err());
        assert!(parse_pr_url("https://github.com/org/repo/pulls/42").is_err());
        assert!(parse_pr_url("https://github.com/org/repo/pull/abc").is_err());
        assert!(parse_pr_url("https://gitlab.com/org/repo/pull/42").is_err());
    }
}

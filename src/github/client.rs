use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::types::{
    CheckRun, CheckRunReport, CreatedComment, CreatedPullRequest, FileWrite, NewPullRequest,
    PullRequestFile, PullRequestMeta, RepoRef,
};
use super::{GitHost, GitHubError};
use crate::config::Config;

const USER_AGENT: &str = "pr-fixer";
const API_VERSION: &str = "2022-11-28";

/// GitHub REST API client backing [`GitHost`].
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct User {
    login: String,
}

#[derive(Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct PullResponse {
    title: String,
    body: Option<String>,
    user: User,
    head: BranchRef,
    base: BranchRef,
    #[serde(default)]
    changed_files: usize,
}

#[derive(Deserialize)]
struct ContentEntry {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct PullCreated {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct CommentCreated {
    id: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct IssueCreated {
    number: u64,
}

#[derive(Deserialize)]
struct CheckRunList {
    check_runs: Vec<CheckRun>,
}

#[derive(Deserialize)]
struct CheckRunCreated {
    id: u64,
}

#[derive(Deserialize)]
struct PermissionResponse {
    permission: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: String) -> Result<Self, GitHubError> {
        let api_url = Url::parse(api_url).map_err(|_| GitHubError::InvalidUrl(api_url.to_string()))?;
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, GitHubError> {
        let token = config
            .github
            .token
            .clone()
            .ok_or(GitHubError::MissingToken)?;
        Self::new(&config.github.api_url, token)
    }

    /// Build an API URL from path segments; each segment is percent-encoded,
    /// and segments containing '/' (file paths, branch names) are split.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url = self.api_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GitHubError::InvalidUrl(self.api_url.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn repo_endpoint(&self, repo: &RepoRef, rest: &[&str]) -> Result<Url, GitHubError> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.repo.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Turn a non-2xx response into `GitHubError::Api`, keeping the API's own message.
    async fn check(response: Response) -> Result<Response, GitHubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => body.message,
            Err(_) => text.chars().take(200).collect(),
        };
        Err(GitHubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn content_entry(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<ContentEntry>, GitHubError> {
        let mut url = self.repo_endpoint(repo, &["contents", path])?;
        url.query_pairs_mut().append_pair("ref", git_ref);
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entry = Self::check(response).await?.json::<ContentEntry>().await?;
        Ok(Some(entry))
    }
}

fn decode_content(entry: &ContentEntry) -> Result<String, GitHubError> {
    if entry.encoding != "base64" {
        return Ok(entry.content.clone());
    }
    let compact: String = entry.content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GitHubError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| GitHubError::Decode(e.to_string()))
}

#[async_trait]
impl GitHost for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequestMeta, GitHubError> {
        let url = self.repo_endpoint(repo, &["pulls", &number.to_string()])?;
        let response = self.request(Method::GET, url).send().await?;
        let pull = Self::check(response).await?.json::<PullResponse>().await?;
        debug!(title = %pull.title, head = %pull.head.sha, "received PR metadata");

        Ok(PullRequestMeta {
            title: pull.title,
            body: pull.body,
            author: pull.user.login,
            head_sha: pull.head.sha,
            head_ref: pull.head.name,
            base_ref: pull.base.name,
            changed_files: pull.changed_files,
        })
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_pull_request_files(
        &self,
        repo: &RepoRef,
        number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<PullRequestFile>, GitHubError> {
        let mut url = self.repo_endpoint(repo, &["pulls", &number.to_string(), "files"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        let response = self.request(Method::GET, url).send().await?;
        let files = Self::check(response)
            .await?
            .json::<Vec<PullRequestFile>>()
            .await?;
        debug!(count = files.len(), "received files page");
        Ok(files)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, GitHubError> {
        match self.content_entry(repo, path, git_ref).await? {
            Some(entry) => decode_content(&entry).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_branch_sha(&self, repo: &RepoRef, branch: &str) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "ref", "heads", branch])?;
        let response = self.request(Method::GET, url).send().await?;
        let git_ref = Self::check(response).await?.json::<GitRef>().await?;
        Ok(git_ref.object.sha)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn create_branch(
        &self,
        repo: &RepoRef,
        name: &str,
        from_sha: &str,
    ) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "refs"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "ref": format!("refs/heads/{}", name), "sha": from_sha }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, write), fields(repo = %repo, path = %write.path, branch = %write.branch))]
    async fn create_or_update_file(
        &self,
        repo: &RepoRef,
        write: &FileWrite,
    ) -> Result<(), GitHubError> {
        // Updating an existing file requires its current blob sha.
        let existing = self
            .content_entry(repo, &write.path, &write.branch)
            .await?
            .map(|entry| entry.sha);

        let mut body = json!({
            "message": write.message,
            "content": base64::engine::general_purpose::STANDARD.encode(write.content.as_bytes()),
            "branch": write.branch,
        });
        if let Some(sha) = existing {
            body["sha"] = json!(sha);
        }

        let url = self.repo_endpoint(repo, &["contents", &write.path])?;
        let response = self.request(Method::PUT, url).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, pull), fields(repo = %repo, head = %pull.head, base = %pull.base))]
    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> Result<CreatedPullRequest, GitHubError> {
        let url = self.repo_endpoint(repo, &["pulls"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({
                "title": pull.title,
                "head": pull.head,
                "base": pull.base,
                "body": pull.body,
            }))
            .send()
            .await?;
        let created = Self::check(response).await?.json::<PullCreated>().await?;
        Ok(CreatedPullRequest {
            number: created.number,
            html_url: created.html_url,
        })
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn add_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["issues", &number.to_string(), "labels"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "labels": labels }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn delete_branch(&self, repo: &RepoRef, name: &str) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "refs", "heads", name])?;
        let response = self.request(Method::DELETE, url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_check_runs(
        &self,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Vec<CheckRun>, GitHubError> {
        let url = self.repo_endpoint(repo, &["commits", sha, "check-runs"])?;
        let response = self.request(Method::GET, url).send().await?;
        let list = Self::check(response).await?.json::<CheckRunList>().await?;
        Ok(list.check_runs)
    }

    #[instrument(skip(self, report), fields(repo = %repo, name = %report.name))]
    async fn create_check_run(
        &self,
        repo: &RepoRef,
        sha: &str,
        report: &CheckRunReport,
    ) -> Result<u64, GitHubError> {
        let url = self.repo_endpoint(repo, &["check-runs"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({
                "name": report.name,
                "head_sha": sha,
                "status": "completed",
                "conclusion": report.conclusion.as_str(),
                "output": { "title": report.title, "summary": report.summary },
            }))
            .send()
            .await?;
        let created = Self::check(response).await?.json::<CheckRunCreated>().await?;
        Ok(created.id)
    }

    #[instrument(skip(self, report), fields(repo = %repo, name = %report.name))]
    async fn update_check_run(
        &self,
        repo: &RepoRef,
        id: u64,
        report: &CheckRunReport,
    ) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["check-runs", &id.to_string()])?;
        let response = self
            .request(Method::PATCH, url)
            .json(&json!({
                "status": "completed",
                "conclusion": report.conclusion.as_str(),
                "output": { "title": report.title, "summary": report.summary },
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, body), fields(repo = %repo))]
    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<CreatedComment, GitHubError> {
        let url = self.repo_endpoint(repo, &["issues", &number.to_string(), "comments"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "body": body }))
            .send()
            .await?;
        let created = Self::check(response).await?.json::<CommentCreated>().await?;
        Ok(CreatedComment {
            id: created.id,
            html_url: created.html_url,
        })
    }

    #[instrument(skip(self, body), fields(repo = %repo))]
    async fn create_issue(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<u64, GitHubError> {
        let url = self.repo_endpoint(repo, &["issues"])?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "title": title, "body": body }))
            .send()
            .await?;
        let created = Self::check(response).await?.json::<IssueCreated>().await?;
        Ok(created.number)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_collaborator_permission(
        &self,
        repo: &RepoRef,
        user: &str,
    ) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["collaborators", user, "permission"])?;
        let response = self.request(Method::GET, url).send().await?;
        let permission = Self::check(response)
            .await?
            .json::<PermissionResponse>()
            .await?;
        Ok(permission.permission)
    }
}

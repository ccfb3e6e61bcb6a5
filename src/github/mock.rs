//! Scriptable in-process [`GitHost`] used by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::types::{
    CheckRun, CheckRunReport, CreatedComment, CreatedPullRequest, FileWrite, NewPullRequest,
    PullRequestFile, PullRequestMeta, RepoRef,
};
use super::{GitHost, GitHubError};

pub struct MockHost {
    pub meta: PullRequestMeta,
    pub files: Vec<PullRequestFile>,
    pub base_sha: String,
    /// File contents by path, served for any ref
    pub contents: HashMap<String, String>,
    /// Paths whose write fails
    pub fail_writes: HashSet<String>,
    pub fail_create_branch: bool,
    pub fail_create_pull: bool,
    pub fail_delete_branch: bool,
    pub fail_labels: bool,
    pub fail_file_content: bool,
    pub permission: String,
    pub check_runs: Vec<CheckRun>,
    calls: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<FileWrite>>,
    pub pulls: Mutex<Vec<NewPullRequest>>,
    pub comments: Mutex<Vec<String>>,
    pub issues: Mutex<Vec<(String, String)>>,
    pub check_reports: Mutex<Vec<(String, CheckRunReport)>>,
}

pub fn sample_meta() -> PullRequestMeta {
    PullRequestMeta {
        title: "Add OAuth2 login flow".to_string(),
        body: Some("Implements login".to_string()),
        author: "alice".to_string(),
        head_sha: "headsha1".to_string(),
        head_ref: "feature/login".to_string(),
        base_ref: "main".to_string(),
        changed_files: 0,
    }
}

pub fn sample_file(name: &str, patch: Option<&str>) -> PullRequestFile {
    let lines = patch.map(|p| p.lines().count()).unwrap_or(0);
    PullRequestFile {
        filename: name.to_string(),
        status: "modified".to_string(),
        additions: lines,
        deletions: 0,
        changes: lines,
        patch: patch.map(str::to_string),
        previous_filename: None,
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            meta: sample_meta(),
            files: Vec::new(),
            base_sha: "basesha1".to_string(),
            contents: HashMap::new(),
            fail_writes: HashSet::new(),
            fail_create_branch: false,
            fail_create_pull: false,
            fail_delete_branch: false,
            fail_labels: false,
            fail_file_content: false,
            permission: "write".to_string(),
            check_runs: Vec::new(),
            calls: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            issues: Mutex::new(Vec::new()),
            check_reports: Mutex::new(Vec::new()),
        }
    }

    pub fn with_files(mut self, files: Vec<PullRequestFile>) -> Self {
        self.meta.changed_files = files.len();
        self.files = files;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn failure(what: &str) -> GitHubError {
        GitHubError::Api {
            status: 500,
            message: format!("{} failed", what),
        }
    }
}

#[async_trait]
impl GitHost for MockHost {
    async fn get_pull_request(
        &self,
        _repo: &RepoRef,
        _number: u64,
    ) -> Result<PullRequestMeta, GitHubError> {
        self.record("get_pull_request".to_string());
        Ok(self.meta.clone())
    }

    async fn list_pull_request_files(
        &self,
        _repo: &RepoRef,
        _number: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<PullRequestFile>, GitHubError> {
        self.record(format!("list_files:{}", page));
        let start = (page.saturating_sub(1) * per_page) as usize;
        Ok(self
            .files
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn get_file_content(
        &self,
        _repo: &RepoRef,
        path: &str,
        _git_ref: &str,
    ) -> Result<Option<String>, GitHubError> {
        self.record(format!("get_file_content:{}", path));
        if self.fail_file_content {
            return Err(Self::failure("get_file_content"));
        }
        Ok(self.contents.get(path).cloned())
    }

    async fn get_branch_sha(&self, _repo: &RepoRef, branch: &str) -> Result<String, GitHubError> {
        self.record(format!("get_branch_sha:{}", branch));
        Ok(self.base_sha.clone())
    }

    async fn create_branch(
        &self,
        _repo: &RepoRef,
        name: &str,
        _from_sha: &str,
    ) -> Result<(), GitHubError> {
        self.record(format!("create_branch:{}", name));
        if self.fail_create_branch {
            return Err(Self::failure("create_branch"));
        }
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        _repo: &RepoRef,
        write: &FileWrite,
    ) -> Result<(), GitHubError> {
        self.record(format!("write:{}", write.path));
        if self.fail_writes.contains(&write.path) {
            return Err(Self::failure("write"));
        }
        self.writes.lock().unwrap().push(write.clone());
        Ok(())
    }

    async fn create_pull_request(
        &self,
        _repo: &RepoRef,
        pull: &NewPullRequest,
    ) -> Result<CreatedPullRequest, GitHubError> {
        self.record("create_pull_request".to_string());
        if self.fail_create_pull {
            return Err(Self::failure("create_pull_request"));
        }
        self.pulls.lock().unwrap().push(pull.clone());
        Ok(CreatedPullRequest {
            number: 101,
            html_url: "https://github.com/acme/api/pull/101".to_string(),
        })
    }

    async fn add_labels(
        &self,
        _repo: &RepoRef,
        _number: u64,
        _labels: &[String],
    ) -> Result<(), GitHubError> {
        self.record("add_labels".to_string());
        if self.fail_labels {
            return Err(Self::failure("add_labels"));
        }
        Ok(())
    }

    async fn delete_branch(&self, _repo: &RepoRef, name: &str) -> Result<(), GitHubError> {
        self.record(format!("delete_branch:{}", name));
        if self.fail_delete_branch {
            return Err(Self::failure("delete_branch"));
        }
        Ok(())
    }

    async fn list_check_runs(
        &self,
        _repo: &RepoRef,
        _sha: &str,
    ) -> Result<Vec<CheckRun>, GitHubError> {
        self.record("list_check_runs".to_string());
        Ok(self.check_runs.clone())
    }

    async fn create_check_run(
        &self,
        _repo: &RepoRef,
        _sha: &str,
        report: &CheckRunReport,
    ) -> Result<u64, GitHubError> {
        self.record("create_check_run".to_string());
        self.check_reports
            .lock()
            .unwrap()
            .push(("create".to_string(), report.clone()));
        Ok(7)
    }

    async fn update_check_run(
        &self,
        _repo: &RepoRef,
        id: u64,
        report: &CheckRunReport,
    ) -> Result<(), GitHubError> {
        self.record(format!("update_check_run:{}", id));
        self.check_reports
            .lock()
            .unwrap()
            .push(("update".to_string(), report.clone()));
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        _repo: &RepoRef,
        _number: u64,
        body: &str,
    ) -> Result<CreatedComment, GitHubError> {
        self.record("comment".to_string());
        let mut comments = self.comments.lock().unwrap();
        comments.push(body.to_string());
        let id = 9000 + comments.len() as u64;
        Ok(CreatedComment {
            id,
            html_url: format!("https://github.com/acme/api/pull/42#issuecomment-{}", id),
        })
    }

    async fn create_issue(
        &self,
        _repo: &RepoRef,
        title: &str,
        body: &str,
    ) -> Result<u64, GitHubError> {
        self.record("create_issue".to_string());
        self.issues
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(55)
    }

    async fn get_collaborator_permission(
        &self,
        _repo: &RepoRef,
        user: &str,
    ) -> Result<String, GitHubError> {
        self.record(format!("permission:{}", user));
        Ok(self.permission.clone())
    }
}

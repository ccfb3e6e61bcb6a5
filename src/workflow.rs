//! End-to-end plan lifecycle: propose on a PR, then approve (execute) or
//! reject. Every collaborator is passed in, so the whole flow runs against
//! in-memory stores and a fake host in tests.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::ai::{generate_change_plan, AiError, ProviderChain};
use crate::config::Config;
use crate::context::{ContextAssembler, ContextCache, ContextError, PrContext};
use crate::execute::{ExecutionEngine, ExecutionOptions, ExecutionResult};
use crate::github::{CheckRunReport, GitHost, GitHubError, PrUrl, RepoRef};
use crate::persistence::StoreError;
use crate::plan::{
    validate_plan, ChangePlan, PlanStore, StatusUpdate, StoredChangePlan, ValidationResult,
};
use crate::report::markdown;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{user} has {permission} permission on {repo}; approving plans needs one of: {allowed}")]
    Unauthorized {
        user: String,
        permission: String,
        repo: String,
        allowed: String,
    },
}

/// How a stored plan is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSelector {
    Id(String),
    /// The comment the plan was posted under
    Comment { repo: RepoRef, comment_id: u64 },
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub pr: PrUrl,
    pub lint_output: Option<String>,
    pub triggered_by: String,
    pub command: String,
}

/// What `propose` produced. `stored` is `None` when the plan was blocked.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub context: PrContext,
    pub plan: ChangePlan,
    pub validation: ValidationResult,
    pub stored: Option<StoredChangePlan>,
}

pub struct Workflow {
    host: Arc<dyn GitHost>,
    store: Arc<dyn PlanStore>,
    assembler: ContextAssembler,
    chain: ProviderChain,
    engine: ExecutionEngine,
    config: Config,
}

impl Workflow {
    pub fn new(
        host: Arc<dyn GitHost>,
        store: Arc<dyn PlanStore>,
        cache: Arc<dyn ContextCache>,
        chain: ProviderChain,
        config: Config,
    ) -> Self {
        let assembler = ContextAssembler::new(
            host.clone(),
            cache,
            config.review_limits(),
            config.cache_ttl(),
        );
        let engine = ExecutionEngine::new(host.clone(), ExecutionOptions::from_config(&config));
        Self {
            host,
            store,
            assembler,
            chain,
            engine,
            config,
        }
    }

    /// Assemble context, generate and validate a plan, publish it, and keep
    /// it as `pending` unless it breaks a hard safety limit.
    #[instrument(skip(self, request), fields(pr = %request.pr.pr_number, user = %request.triggered_by))]
    pub async fn propose(&self, request: &PlanRequest) -> Result<Proposal, WorkflowError> {
        let repo = request.pr.repo_ref();
        let context = self.assembler.assemble(&request.pr).await?;
        let plan =
            generate_change_plan(&self.chain, &context, request.lint_output.as_deref()).await?;

        let limits = self.config.safety_limits(&repo.owner, &repo.repo);
        let validation = validate_plan(&plan, &limits);
        self.publish_check(&repo, &context.commit_sha, &markdown::validation_check(&validation))
            .await;

        if validation.is_blocking() {
            warn!(
                plan = %plan.id,
                violations = validation.violations.len(),
                "plan blocked by safety limits, not saved"
            );
            let body = markdown::blocked_plan_comment(&plan, &validation);
            self.host
                .create_issue_comment(&repo, request.pr.pr_number, &body)
                .await?;
            return Ok(Proposal {
                context,
                plan,
                validation,
                stored: None,
            });
        }

        let mut stored = StoredChangePlan::new(
            &repo,
            request.pr.pr_number,
            plan.clone(),
            validation.violations.clone(),
            &request.triggered_by,
            &request.command,
        );
        // Saved before commenting, so no comment ever points at a missing plan.
        self.store.create(&stored).await?;
        let comment = self
            .host
            .create_issue_comment(&repo, request.pr.pr_number, &markdown::plan_comment(&stored))
            .await?;
        self.store.set_comment_id(&stored.id, comment.id).await?;
        stored.comment_id = Some(comment.id);
        info!(plan = %stored.id, comment = comment.id, "plan saved as pending");

        Ok(Proposal {
            context,
            plan,
            validation,
            stored: Some(stored),
        })
    }

    /// Create the validation check run, or update it if one already exists on
    /// the head commit. Failures are logged only.
    async fn publish_check(&self, repo: &RepoRef, sha: &str, report: &CheckRunReport) {
        let existing = match self.host.list_check_runs(repo, sha).await {
            Ok(runs) => runs.into_iter().find(|run| run.name == report.name),
            Err(err) => {
                warn!(%err, "could not list check runs");
                None
            }
        };
        let published = match existing {
            Some(run) => self.host.update_check_run(repo, run.id, report).await,
            None => self.host.create_check_run(repo, sha, report).await.map(|_| ()),
        };
        if let Err(err) = published {
            warn!(%err, "could not publish validation check run");
        }
    }

    pub async fn find(&self, selector: &PlanSelector) -> Result<StoredChangePlan, WorkflowError> {
        let found = match selector {
            PlanSelector::Id(id) => self.store.get_by_id(id).await?,
            PlanSelector::Comment { repo, comment_id } => {
                self.store.get_by_comment_id(repo, *comment_id).await?
            }
        };
        let missing = || match selector {
            PlanSelector::Id(id) => id.clone(),
            PlanSelector::Comment { repo, comment_id } => {
                format!("for comment {} in {}", comment_id, repo)
            }
        };
        found.ok_or_else(|| StoreError::NotFound(missing()).into())
    }

    /// Check the approver's permission, move the plan to `executing`, run it,
    /// and record the outcome on the plan and the source PR.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        selector: &PlanSelector,
        approver: &str,
    ) -> Result<ExecutionResult, WorkflowError> {
        let stored = self.find(selector).await?;
        let repo = stored.repo_ref();

        let permission = self.host.get_collaborator_permission(&repo, approver).await?;
        let allowed = &self.config.execution.allowed_permissions;
        if !allowed.iter().any(|p| p.eq_ignore_ascii_case(&permission)) {
            return Err(WorkflowError::Unauthorized {
                user: approver.to_string(),
                permission,
                repo: repo.to_string(),
                allowed: allowed.join(", "),
            });
        }

        let stored = self
            .store
            .update_status(
                &stored.id,
                StatusUpdate::Approve {
                    approver: approver.to_string(),
                },
            )
            .await?;
        info!(plan = %stored.id, approver, "plan approved, executing");

        let pull = match self.host.get_pull_request(&repo, stored.pr_number).await {
            Ok(pull) => pull,
            Err(err) => {
                self.store
                    .update_status(
                        &stored.id,
                        StatusUpdate::Fail {
                            error: format!("Could not load source pull request: {}", err),
                        },
                    )
                    .await?;
                return Err(err.into());
            }
        };

        let result = self
            .engine
            .execute(&repo, &stored.plan, &pull.head_ref, Some(stored.pr_number))
            .await;

        let update = match (result.success, result.pr_number) {
            (true, Some(pr_number)) => StatusUpdate::Complete { pr_number },
            _ => StatusUpdate::Fail {
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            },
        };
        let stored = self.store.update_status(&stored.id, update).await?;
        info!(plan = %stored.id, status = %stored.status, "execution recorded");

        let comment = markdown::outcome_comment(&stored, &result);
        if let Err(err) = self
            .host
            .create_issue_comment(&repo, stored.pr_number, &comment)
            .await
        {
            warn!(%err, "could not post outcome comment");
        }

        if let Some(branch) = result.orphaned_branch() {
            let (title, body) = markdown::orphaned_branch_issue(
                &repo,
                &stored,
                branch,
                result.rollback_error.as_deref(),
            );
            match self.host.create_issue(&repo, &title, &body).await {
                Ok(number) => warn!(branch, issue = number, "orphaned branch reported"),
                Err(err) => warn!(branch, %err, "could not open cleanup issue"),
            }
        }

        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        selector: &PlanSelector,
        reason: &str,
    ) -> Result<StoredChangePlan, WorkflowError> {
        let stored = self.find(selector).await?;
        let stored = self
            .store
            .update_status(
                &stored.id,
                StatusUpdate::Reject {
                    reason: reason.to_string(),
                },
            )
            .await?;

        let comment = format!("Change plan `{}` was rejected: {}\n", stored.id, reason);
        if let Err(err) = self
            .host
            .create_issue_comment(&stored.repo_ref(), stored.pr_number, &comment)
            .await
        {
            warn!(%err, "could not post rejection comment");
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::{chain, ScriptedProvider};
    use crate::context::MemoryContextCache;
    use crate::github::mock::{sample_file, MockHost};
    use crate::github::{CheckConclusion, CheckRun};
    use crate::plan::store::tests::stored_plan;
    use crate::plan::tests::test_plan;
    use crate::plan::{MemoryPlanStore, PlanStatus};

    struct Harness {
        host: Arc<MockHost>,
        store: Arc<MemoryPlanStore>,
        workflow: Workflow,
    }

    fn harness(host: MockHost, replies: Vec<String>) -> Harness {
        let host = Arc::new(host);
        let store = Arc::new(MemoryPlanStore::new());
        let provider = Arc::new(ScriptedProvider::new(
            "scripted",
            replies.into_iter().map(Ok).collect(),
        ));
        let workflow = Workflow::new(
            host.clone(),
            store.clone(),
            Arc::new(MemoryContextCache::new()),
            chain(vec![provider]),
            Config::default(),
        );
        Harness {
            host,
            store,
            workflow,
        }
    }

    fn request() -> PlanRequest {
        PlanRequest {
            pr: PrUrl {
                owner: "acme".to_string(),
                repo: "api".to_string(),
                pr_number: 42,
            },
            lint_output: Some("warning: needless return".to_string()),
            triggered_by: "alice".to_string(),
            command: "/fix lint".to_string(),
        }
    }

    fn host_with_diff() -> MockHost {
        MockHost::new().with_files(vec![sample_file(
            "src/lib.rs",
            Some("@@ -1 +1 @@\n-fn a() { return 1; }\n+fn a() -> i32 { return 1; }"),
        )])
    }

    fn reply(files: usize, lines: usize) -> String {
        serde_json::to_string(&test_plan(files, lines)).unwrap()
    }

    #[tokio::test]
    async fn test_propose_saves_pending_plan_and_comments() {
        let h = harness(host_with_diff(), vec![reply(2, 20)]);
        let proposal = h.workflow.propose(&request()).await.unwrap();

        let stored = proposal.stored.unwrap();
        assert_eq!(stored.status, PlanStatus::Pending);
        assert_eq!(stored.comment_id, Some(9001));
        assert_eq!(stored.triggered_by, "alice");
        let persisted = h.store.get_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(persisted.comment_id, Some(9001));

        let comments = h.host.comments.lock().unwrap();
        assert!(comments[0].contains("Proposed change plan"));
        let checks = h.host.check_reports.lock().unwrap();
        assert_eq!(checks[0].0, "create");
        assert_eq!(checks[0].1.conclusion, CheckConclusion::Success);
    }

    #[tokio::test]
    async fn test_propose_blocks_plans_over_limits() {
        let h = harness(host_with_diff(), vec![reply(12, 100)]);
        let proposal = h.workflow.propose(&request()).await.unwrap();

        assert!(proposal.stored.is_none());
        assert_eq!(proposal.validation.violations.len(), 1);
        assert!(proposal.validation.violations[0].message.contains("12 files"));
        assert!(h.store.get_by_id("plan-1").await.unwrap().is_none());

        let comments = h.host.comments.lock().unwrap();
        assert!(comments[0].contains("Change plan blocked"));
        let checks = h.host.check_reports.lock().unwrap();
        assert_eq!(checks[0].1.conclusion, CheckConclusion::Failure);
    }

    #[tokio::test]
    async fn test_existing_check_run_is_updated() {
        let mut host = host_with_diff();
        host.check_runs.push(CheckRun {
            id: 3,
            name: markdown::CHECK_RUN_NAME.to_string(),
        });
        let h = harness(host, vec![reply(1, 5)]);
        h.workflow.propose(&request()).await.unwrap();
        assert_eq!(h.host.count_calls("update_check_run:3"), 1);
        assert_eq!(h.host.count_calls("create_check_run"), 0);
    }

    #[tokio::test]
    async fn test_failed_save_posts_no_comment() {
        let h = harness(host_with_diff(), vec![reply(2, 20)]);
        h.store.create(&stored_plan("plan-1")).await.unwrap();

        let err = h.workflow.propose(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Store(StoreError::Duplicate(_))
        ));
        assert_eq!(h.host.count_calls("comment"), 0);
    }

    #[tokio::test]
    async fn test_ai_failure_saves_nothing() {
        let h = harness(host_with_diff(), vec!["no plan here".to_string()]);
        let err = h.workflow.propose(&request()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Ai(AiError::Plan(_))));
        assert_eq!(h.host.count_calls("comment"), 0);
    }

    #[tokio::test]
    async fn test_approve_executes_and_completes() {
        let h = harness(MockHost::new(), Vec::new());
        h.store.create(&stored_plan("p1")).await.unwrap();

        let result = h
            .workflow
            .approve(&PlanSelector::Id("p1".to_string()), "bob")
            .await
            .unwrap();
        assert!(result.success);

        let stored = h.store.get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, PlanStatus::Completed);
        assert_eq!(stored.result_pr_number, Some(101));
        assert_eq!(stored.approved_by.as_deref(), Some("bob"));

        let pulls = h.host.pulls.lock().unwrap();
        assert_eq!(pulls[0].base, "feature/login");
        let comments = h.host.comments.lock().unwrap();
        assert!(comments.last().unwrap().contains("was applied"));
    }

    #[tokio::test]
    async fn test_second_approval_is_rejected() {
        let h = harness(MockHost::new(), Vec::new());
        h.store.create(&stored_plan("p1")).await.unwrap();
        let selector = PlanSelector::Id("p1".to_string());

        h.workflow.approve(&selector, "bob").await.unwrap();
        let err = h.workflow.approve(&selector, "carol").await.unwrap_err();
        assert!(err.to_string().contains("already completed"));
        assert_eq!(h.host.count_calls("create_pull_request"), 1);
    }

    #[tokio::test]
    async fn test_approver_without_write_access_is_refused() {
        let mut host = MockHost::new();
        host.permission = "read".to_string();
        let h = harness(host, Vec::new());
        h.store.create(&stored_plan("p1")).await.unwrap();

        let err = h
            .workflow
            .approve(&PlanSelector::Id("p1".to_string()), "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized { .. }));
        let stored = h.store.get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, PlanStatus::Pending);
        assert_eq!(h.host.count_calls("create_branch"), 0);
    }

    #[tokio::test]
    async fn test_total_failure_marks_plan_failed() {
        let mut host = MockHost::new();
        host.fail_writes.insert("src/file0.rs".to_string());
        host.fail_writes.insert("src/file1.rs".to_string());
        let h = harness(host, Vec::new());
        h.store.create(&stored_plan("p1")).await.unwrap();

        let result = h
            .workflow
            .approve(&PlanSelector::Id("p1".to_string()), "bob")
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.rollback_performed);

        let stored = h.store.get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, PlanStatus::Failed);
        assert!(stored.error.unwrap().contains("No files were committed"));
        assert_eq!(h.host.count_calls("create_issue"), 0);
    }

    #[tokio::test]
    async fn test_orphaned_branch_opens_cleanup_issue() {
        let mut host = MockHost::new();
        host.fail_create_pull = true;
        host.fail_delete_branch = true;
        let h = harness(host, Vec::new());
        h.store.create(&stored_plan("p1")).await.unwrap();

        let result = h
            .workflow
            .approve(&PlanSelector::Id("p1".to_string()), "bob")
            .await
            .unwrap();
        assert!(result.orphaned_branch().is_some());

        let issues = h.host.issues.lock().unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].0.contains("orphaned branch"));
        let comments = h.host.comments.lock().unwrap();
        assert!(comments.last().unwrap().contains("Rollback failed"));
    }

    #[tokio::test]
    async fn test_approve_by_comment_and_reject() {
        let h = harness(MockHost::new(), Vec::new());
        let mut plan = stored_plan("p1");
        plan.comment_id = Some(777);
        h.store.create(&plan).await.unwrap();
        h.store.create(&stored_plan("p2")).await.unwrap();

        let pending = h
            .store
            .get_pending_for_pr(&RepoRef::new("acme", "api"), 42)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);

        let by_comment = PlanSelector::Comment {
            repo: RepoRef::new("acme", "api"),
            comment_id: 777,
        };
        assert_eq!(h.workflow.find(&by_comment).await.unwrap().id, "p1");

        let rejected = h
            .workflow
            .reject(&PlanSelector::Id("p2".to_string()), "not needed")
            .await
            .unwrap();
        assert_eq!(rejected.status, PlanStatus::Rejected);
        assert_eq!(rejected.error.as_deref(), Some("not needed"));

        let missing = h
            .workflow
            .find(&PlanSelector::Id("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(missing, WorkflowError::Store(StoreError::NotFound(_))));
    }
}

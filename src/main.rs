mod ai;
mod config;
mod context;
mod execute;
mod github;
mod persistence;
mod plan;
mod preflight;
mod report;
mod sweep;
mod workflow;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span};
use tracing_subscriber::EnvFilter;

use crate::ai::ProviderChain;
use crate::context::{ContextAssembler, ContextCache};
use crate::github::{GitHost, GitHubClient, RepoRef};
use crate::persistence::{SqliteContextCache, SqlitePlanStore};
use crate::plan::PlanStore;
use crate::workflow::{PlanRequest, PlanSelector, Workflow};

/// PR Fixer: proposes AI-generated change plans for a GitHub Pull Request and
/// applies them as a follow-up PR once a maintainer approves.
#[derive(Parser, Debug)]
#[command(name = "pr-fixer", version, about)]
struct Cli {
    /// Config file (defaults to .pr-fixer.toml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble and print the budgeted review context for a PR
    Context {
        /// GitHub Pull Request URL (e.g., https://github.com/org/repo/pull/42)
        pr_url: String,

        /// Also print the budgeted unified diff
        #[arg(long)]
        diff: bool,
    },

    /// Generate a change plan for a PR, post it, and save it for approval
    Plan {
        pr_url: String,

        /// File holding linter output to fix
        #[arg(long)]
        lint: Option<PathBuf>,

        /// User the plan is requested for
        #[arg(long, default_value = "pr-fixer")]
        user: String,

        /// Command text recorded with the plan
        #[arg(long, default_value = "/fix")]
        command: String,
    },

    /// Check a plan JSON file against the safety limits
    Validate {
        plan_file: PathBuf,

        /// Repository whose limits apply (owner/repo)
        #[arg(long)]
        repo: Option<String>,
    },

    /// Syntax-check the proposed contents of a plan JSON file
    Preflight { plan_file: PathBuf },

    /// Approve a pending plan and execute it
    Approve {
        /// Plan id (omit when using --comment)
        plan_id: Option<String>,

        /// Select the plan by the comment it was posted under
        #[arg(long, requires = "repo")]
        comment: Option<u64>,

        /// Repository of the comment (owner/repo)
        #[arg(long)]
        repo: Option<String>,

        /// GitHub login of the approver
        #[arg(long = "user")]
        approver: String,
    },

    /// Reject a pending plan
    Reject {
        plan_id: String,

        #[arg(long, default_value = "Rejected by maintainer")]
        reason: String,
    },

    /// Show a stored plan
    Show {
        plan_id: String,

        /// Write the plan as markdown to this file instead
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List pending plans for a PR
    Pending { pr_url: String },

    /// Expire stale plans and purge expired cached contexts
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Context { pr_url, diff } => {
            let _span = info_span!("context", pr_url = %pr_url).entered();
            let pr = github::parse_pr_url(&pr_url)?;
            let (_, cache) = open_stores(&config).await?;
            let host: Arc<dyn GitHost> = Arc::new(GitHubClient::from_config(&config)?);
            let assembler =
                ContextAssembler::new(host, cache, config.review_limits(), config.cache_ttl());
            let context = assembler.assemble(&pr).await?;
            report::print_context(&context, diff);
        }

        Command::Plan {
            pr_url,
            lint,
            user,
            command,
        } => {
            let pr = github::parse_pr_url(&pr_url)?;
            debug!(owner = %pr.owner, repo = %pr.repo, pr = pr.pr_number, "parsed PR URL");
            let lint_output = lint.map(std::fs::read_to_string).transpose()?;
            let workflow = build_workflow(&config).await?;

            let proposal = workflow
                .propose(&PlanRequest {
                    pr,
                    lint_output,
                    triggered_by: user,
                    command,
                })
                .await?;
            report::print_context(&proposal.context, false);
            report::print_plan(&proposal.plan);
            report::print_validation(&proposal.validation);
            match proposal.stored {
                Some(stored) => info!(plan = %stored.id, "plan saved, awaiting approval"),
                None => return Err("plan blocked by safety limits".into()),
            }
        }

        Command::Validate { plan_file, repo } => {
            let plan = read_plan(&plan_file)?;
            let limits = match repo.as_deref().and_then(RepoRef::parse) {
                Some(repo) => config.safety_limits(&repo.owner, &repo.repo),
                None => config.safety_limits("", ""),
            };
            let validation = plan::validate_plan(&plan, &limits);
            report::print_plan(&plan);
            report::print_validation(&validation);
            if validation.is_blocking() {
                return Err("plan exceeds safety limits".into());
            }
        }

        Command::Preflight { plan_file } => {
            let plan = read_plan(&plan_file)?;
            let preflight = preflight::check_plan(&plan);
            report::print_preflight(&preflight);
            if !preflight.is_valid {
                return Err("syntax preflight failed".into());
            }
        }

        Command::Approve {
            plan_id,
            comment,
            repo,
            approver,
        } => {
            let selector = match (plan_id, comment, repo) {
                (Some(id), None, _) => PlanSelector::Id(id),
                (None, Some(comment_id), Some(repo)) => PlanSelector::Comment {
                    repo: RepoRef::parse(&repo).ok_or("--repo must look like owner/repo")?,
                    comment_id,
                },
                _ => return Err("pass either a plan id or --comment with --repo".into()),
            };
            let workflow = build_workflow(&config).await?;
            let result = workflow.approve(&selector, &approver).await?;
            report::print_execution(&result);
            if !result.success {
                return Err("plan execution failed".into());
            }
        }

        Command::Reject { plan_id, reason } => {
            let workflow = build_workflow(&config).await?;
            let stored = workflow.reject(&PlanSelector::Id(plan_id), &reason).await?;
            info!(plan = %stored.id, "plan rejected");
        }

        Command::Show { plan_id, output } => {
            let (store, _) = open_stores(&config).await?;
            let stored = store
                .get_by_id(&plan_id)
                .await?
                .ok_or_else(|| persistence::StoreError::NotFound(plan_id.clone()))?;
            report::output_plan(&stored, output.as_deref())?;
        }

        Command::Pending { pr_url } => {
            let pr = github::parse_pr_url(&pr_url)?;
            let (store, _) = open_stores(&config).await?;
            let pending = store.get_pending_for_pr(&pr.repo_ref(), pr.pr_number).await?;
            if pending.is_empty() {
                println!("No pending plans for {}#{}", pr.repo_ref(), pr.pr_number);
            }
            for stored in &pending {
                report::print_stored_plan(stored);
            }
        }

        Command::Sweep { watch } => {
            let (store, cache) = open_stores(&config).await?;
            if watch {
                let interval = Duration::from_secs(config.plans.sweep_interval_secs);
                info!(interval_secs = interval.as_secs(), "starting periodic sweep");
                sweep::run_periodic(store, cache, config.plan_expiry(), interval).await;
            } else {
                let summary =
                    sweep::sweep_once(store.as_ref(), cache.as_ref(), config.plan_expiry()).await?;
                println!(
                    "Expired {} plan(s), purged {} cached context(s)",
                    summary.expired_plans.len(),
                    summary.purged_contexts
                );
            }
        }
    }

    info!("done");
    Ok(())
}

async fn open_stores(
    config: &config::Config,
) -> CliResult<(Arc<dyn PlanStore>, Arc<dyn ContextCache>)> {
    info!(database = %config.plans.database.display(), "opening plan database");
    let pool = persistence::connect(&config.plans.database).await?;
    Ok((
        Arc::new(SqlitePlanStore::new(pool.clone())),
        Arc::new(SqliteContextCache::new(pool)),
    ))
}

async fn build_workflow(config: &config::Config) -> CliResult<Workflow> {
    let host: Arc<dyn GitHost> = Arc::new(GitHubClient::from_config(config)?);
    let (store, cache) = open_stores(config).await?;
    let chain = ProviderChain::from_config(config);
    Ok(Workflow::new(host, store, cache, chain, config.clone()))
}

fn read_plan(path: &Path) -> CliResult<plan::ChangePlan> {
    let text = std::fs::read_to_string(path)?;
    Ok(plan::parse_plan(&text)?)
}

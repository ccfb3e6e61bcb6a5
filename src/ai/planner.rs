use tracing::{info, instrument};

use super::{AiError, Prompt, ProviderChain};
use crate::context::PrContext;
use crate::plan::{parse_plan, ChangePlan};

/// Lint output beyond this is cut before it reaches the prompt.
const MAX_LINT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = r#"You are a careful senior engineer proposing fixes to a pull request.
Reply with a single JSON object and nothing else, using this shape:

{
  "title": "short imperative title",
  "summary": "what the change does",
  "rationale": "why these edits fix the reported problems",
  "files": [
    {
      "path": "relative/path/from/repo/root",
      "action": "modify" | "create" | "delete",
      "description": "what changes in this file",
      "originalContent": "current full file content (optional)",
      "proposedContent": "complete new file content",
      "diff": "unified diff (optional)",
      "issuesAddressed": ["lint rule or problem fixed"],
      "riskLevel": "low" | "medium" | "high"
    }
  ],
  "totalFiles": 1,
  "estimatedLinesChanged": 10,
  "riskAssessment": {
    "overall": "low" | "medium" | "high",
    "factors": ["..."],
    "mitigations": ["..."]
  },
  "testingRecommendations": ["..."],
  "rollbackPlan": "how to undo the change"
}

Rules:
- proposedContent must be the complete file, not a fragment.
- Touch as few files and lines as possible.
- Paths are relative to the repository root and never contain "..".
- Never change files unrelated to the reported problems."#;

/// Build the prompt for one PR. The diff is already bounded by the context
/// budgets; lint output is capped here.
pub fn build_prompt(context: &PrContext, lint_output: Option<&str>) -> Prompt {
    let mut user = format!(
        "Repository: {}/{}\nPull request #{}: {}\nAuthor: {}\nBase branch: {}\nHead commit: {}\n",
        context.owner,
        context.repo,
        context.pr_number,
        context.title,
        context.author,
        context.base_branch,
        context.commit_sha,
    );

    if let Some(description) = context.description.as_deref().map(str::trim) {
        if !description.is_empty() {
            user.push_str(&format!("\nDescription:\n{}\n", description));
        }
    }

    user.push_str(&format!(
        "\nChanged files: {} total, {} shown",
        context.total_files, context.reviewed_files
    ));
    if !context.warnings.is_empty() {
        user.push_str(&format!(" ({})", context.warnings.join("; ")));
    }
    user.push_str("\n\nDiff:\n");
    user.push_str(&context.diff);

    match lint_output.map(str::trim).filter(|s| !s.is_empty()) {
        Some(lint) => {
            let total = lint.chars().count();
            let shown: String = lint.chars().take(MAX_LINT_CHARS).collect();
            user.push_str("\n\nProblems to fix:\n");
            user.push_str(&shown);
            if total > MAX_LINT_CHARS {
                user.push_str(&format!(
                    "\n... [lint output truncated, {} more characters]",
                    total - MAX_LINT_CHARS
                ));
            }
        }
        None => user.push_str("\n\nReview the diff and fix any bugs or lint problems you find."),
    }

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Ask the provider chain for a change plan and parse it strictly.
#[instrument(skip_all, fields(owner = %context.owner, repo = %context.repo, pr = context.pr_number))]
pub async fn generate_change_plan(
    chain: &ProviderChain,
    context: &PrContext,
    lint_output: Option<&str>,
) -> Result<ChangePlan, AiError> {
    let prompt = build_prompt(context, lint_output);
    let completion = chain.generate(&prompt).await?;
    let plan = parse_plan(&completion.text)?;
    info!(
        provider = %completion.provider,
        plan = %plan.id,
        files = plan.total_files,
        "change plan generated"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::{chain, ScriptedProvider};
    use crate::context::cache::tests::sample_context;
    use std::sync::Arc;

    const PLAN_REPLY: &str = r#"Here is the plan:
```json
{
  "title": "Remove unused import",
  "summary": "Drops an unused import flagged by clippy",
  "rationale": "Keeps the build warning-free",
  "files": [
    {
      "path": "src/lib.rs",
      "action": "modify",
      "description": "remove unused import",
      "proposedContent": "pub fn run() {}\n",
      "issuesAddressed": ["unused_imports"],
      "riskLevel": "low"
    }
  ],
  "totalFiles": 1,
  "estimatedLinesChanged": 1,
  "riskAssessment": {"overall": "low", "factors": [], "mitigations": []},
  "testingRecommendations": ["cargo test"],
  "rollbackPlan": "revert the commit"
}
```"#;

    #[test]
    fn test_prompt_includes_context_and_lint() {
        let context = sample_context("abc123");
        let prompt = build_prompt(&context, Some("warning: unused import `std::fs`"));
        assert!(prompt.system.contains("proposedContent"));
        assert!(prompt.user.contains("acme/api"));
        assert!(prompt.user.contains("abc123"));
        assert!(prompt.user.contains("unused import `std::fs`"));
    }

    #[test]
    fn test_long_lint_output_is_capped() {
        let context = sample_context("abc123");
        let lint = "x".repeat(MAX_LINT_CHARS + 50);
        let prompt = build_prompt(&context, Some(&lint));
        assert!(prompt.user.contains("50 more characters"));
        assert!(!prompt.user.contains(&"x".repeat(MAX_LINT_CHARS + 1)));
    }

    #[tokio::test]
    async fn test_generates_plan_from_fenced_reply() {
        let provider = Arc::new(ScriptedProvider::new("p", vec![Ok(PLAN_REPLY.to_string())]));
        let plan = generate_change_plan(&chain(vec![provider]), &sample_context("s"), None)
            .await
            .unwrap();
        assert_eq!(plan.title, "Remove unused import");
        assert_eq!(plan.files.len(), 1);
        assert!(!plan.id.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_a_plan_error() {
        let provider = Arc::new(ScriptedProvider::new(
            "p",
            vec![Ok("I could not find anything to fix.".to_string())],
        ));
        let err = generate_change_plan(&chain(vec![provider]), &sample_context("s"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Plan(_)));
    }
}

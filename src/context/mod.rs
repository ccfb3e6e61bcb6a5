pub mod budget;
pub mod cache;
pub mod ignore;
pub mod types;

#[cfg(test)]
mod memory;

pub use cache::ContextCache;
#[cfg(test)]
pub use memory::MemoryContextCache;
#[cfg(test)]
pub use types::FileStatus;
pub use types::{ChangedFile, PrContext, ReviewLimits, SkipReason};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::github::{GitHost, GitHubError, PrUrl, PullRequestFile, RepoRef};
use ignore::IgnoreMatcher;

/// Page size for the changed-files listing.
pub const PAGE_SIZE: u32 = 100;
/// Hard ceiling on pages fetched (3000 files).
pub const MAX_PAGES: u32 = 30;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Failed to fetch pull request data: {0}")]
    GitHub(#[from] GitHubError),
}

/// Builds one [`PrContext`] per (repository, pull request, head commit).
pub struct ContextAssembler {
    host: Arc<dyn GitHost>,
    cache: Arc<dyn ContextCache>,
    limits: ReviewLimits,
    ttl: Duration,
}

impl ContextAssembler {
    pub fn new(
        host: Arc<dyn GitHost>,
        cache: Arc<dyn ContextCache>,
        limits: ReviewLimits,
        ttl: Duration,
    ) -> Self {
        Self {
            host,
            cache,
            limits,
            ttl,
        }
    }

    /// Assemble the review context for `pr`, serving from cache when the head
    /// commit has not moved.
    #[instrument(skip(self), fields(owner = %pr.owner, repo = %pr.repo, pr = pr.pr_number))]
    pub async fn assemble(&self, pr: &PrUrl) -> Result<PrContext, ContextError> {
        let repo = pr.repo_ref();
        let meta = self.host.get_pull_request(&repo, pr.pr_number).await?;

        match self.cache.get(&repo, pr.pr_number, &meta.head_sha).await {
            Ok(Some(mut cached)) => {
                info!(sha = %meta.head_sha, "serving PR context from cache");
                cached.from_cache = true;
                return Ok(cached);
            }
            Ok(None) => debug!(sha = %meta.head_sha, "context cache miss"),
            Err(err) => warn!(%err, "context cache read failed, assembling fresh"),
        }

        let raw_files = self.fetch_all_files(&repo, pr.pr_number).await?;
        let fetched = raw_files.len();

        let matcher = IgnoreMatcher::new(&self.limits.ignore_patterns);
        let mut files = Vec::with_capacity(fetched);
        let mut reviewed = 0usize;
        let mut skipped = 0usize;
        let mut truncated = 0usize;
        let mut additions = 0usize;
        let mut deletions = 0usize;

        for raw in raw_files {
            let mut file = ChangedFile::from(raw);
            additions += file.additions;
            deletions += file.deletions;

            if reviewed >= self.limits.max_files {
                file.skip(SkipReason::FileLimit);
                skipped += 1;
            } else if matcher.is_ignored(&file.filename) {
                file.skip(SkipReason::IgnorePattern);
                skipped += 1;
            } else if file.patch.as_deref().map_or(true, str::is_empty) {
                file.skip(SkipReason::BinaryOrEmpty);
                skipped += 1;
            } else {
                let patch = file.patch.take().unwrap_or_default();
                let result = budget::truncate_file(
                    &patch,
                    self.limits.max_lines_per_file,
                    self.limits.max_chars_per_file,
                );
                if result.truncated {
                    debug!(file = %file.filename, lines = result.original_lines, "truncated file diff");
                    truncated += 1;
                }
                file.truncated = result.truncated;
                file.patch = Some(result.content);
                reviewed += 1;
            }
            files.push(file);
        }

        // Shared line budget over the files that survived per-file processing.
        let accepted: Vec<usize> = (0..files.len()).filter(|&i| !files[i].skipped).collect();
        let diffs: Vec<String> = accepted
            .iter()
            .map(|&i| files[i].patch.clone().unwrap_or_default())
            .collect();
        let budgeted = budget::truncate_across_files(
            &diffs,
            self.limits.max_total_lines,
            self.limits.max_chars_per_file,
        );
        for (&i, result) in accepted.iter().zip(budgeted) {
            let file = &mut files[i];
            if result.skipped {
                if file.truncated {
                    file.truncated = false;
                    truncated -= 1;
                }
                file.skip(SkipReason::DiffBudget);
                reviewed -= 1;
                skipped += 1;
            } else {
                if result.truncated && !file.truncated {
                    file.truncated = true;
                    truncated += 1;
                }
                file.patch = Some(result.content);
            }
        }

        let mut warnings = Vec::new();
        if fetched > self.limits.max_files {
            warnings.push(format!(
                "PR has {} files, only reviewing first {}",
                fetched, self.limits.max_files
            ));
        }
        if meta.changed_files > fetched {
            warnings.push(format!(
                "PR lists {} changed files, only {} could be fetched",
                meta.changed_files, fetched
            ));
        }
        if truncated > 0 {
            warnings.push(format!("{} file(s) truncated", truncated));
        }
        if skipped > 0 {
            warnings.push(format!("{} file(s) skipped", skipped));
        }

        let context = PrContext {
            owner: pr.owner.clone(),
            repo: pr.repo.clone(),
            pr_number: pr.pr_number,
            commit_sha: meta.head_sha,
            title: meta.title,
            description: meta.body,
            author: meta.author,
            base_branch: meta.base_ref,
            head_branch: meta.head_ref,
            total_files: fetched,
            reviewed_files: reviewed,
            skipped_files: skipped,
            truncated_files: truncated,
            total_additions: additions,
            total_deletions: deletions,
            diff: format_diff(&files),
            files,
            warnings,
            from_cache: false,
            fetched_at: Utc::now(),
        };
        info!(
            total = context.total_files,
            reviewed = context.reviewed_files,
            skipped = context.skipped_files,
            truncated = context.truncated_files,
            "assembled PR context"
        );

        // A new head commit makes every older snapshot of this PR stale.
        if let Err(err) = self.cache.invalidate(&repo, pr.pr_number).await {
            warn!(%err, "failed to invalidate stale contexts");
        }
        if let Err(err) = self.cache.put(&context, self.ttl).await {
            warn!(%err, "failed to cache PR context");
        }

        Ok(context)
    }

    async fn fetch_all_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<PullRequestFile>, GitHubError> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch = self
                .host
                .list_pull_request_files(repo, number, page, PAGE_SIZE)
                .await?;
            let full_page = batch.len() as u32 == PAGE_SIZE;
            all.extend(batch);
            if !full_page {
                return Ok(all);
            }
        }
        warn!(
            files = all.len(),
            pages = MAX_PAGES,
            "reached file pagination ceiling, remaining files not fetched"
        );
        Ok(all)
    }
}

/// Concatenate reviewed diffs under per-file headers.
pub fn format_diff(files: &[ChangedFile]) -> String {
    let mut out = String::new();
    for file in files.iter().filter(|f| !f.skipped) {
        let Some(patch) = file.patch.as_deref() else {
            continue;
        };
        out.push_str(&format!(
            "### {} ({}, +{} -{})",
            file.filename, file.status, file.additions, file.deletions
        ));
        if let Some(previous) = &file.previous_filename {
            out.push_str(&format!(" renamed from {}", previous));
        }
        if file.truncated {
            out.push_str(" [truncated]");
        }
        out.push_str("\n```diff\n");
        out.push_str(patch);
        if !patch.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::mock::{sample_file, MockHost};

    fn pr_url() -> PrUrl {
        PrUrl {
            owner: "acme".to_string(),
            repo: "api".to_string(),
            pr_number: 42,
        }
    }

    fn patch(lines: usize) -> String {
        (0..lines)
            .map(|i| format!("+line {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn assembler(host: Arc<MockHost>, limits: ReviewLimits) -> ContextAssembler {
        ContextAssembler::new(
            host,
            Arc::new(MemoryContextCache::new()),
            limits,
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_sixty_files_with_ignore_and_file_limit() {
        let mut files = Vec::new();
        for i in 0..58 {
            files.push(sample_file(&format!("src/file{}.rs", i), Some(&patch(3))));
        }
        files.push(sample_file("Cargo.lock", Some(&patch(3))));
        files.push(sample_file("web/yarn.lock", Some(&patch(3))));
        let host = Arc::new(MockHost::new().with_files(files));

        let limits = ReviewLimits {
            max_files: 50,
            ignore_patterns: vec!["*.lock".to_string()],
            ..ReviewLimits::default()
        };
        let context = assembler(host, limits).assemble(&pr_url()).await.unwrap();

        assert_eq!(context.total_files, 60);
        assert!(context.skipped_files >= 10);
        assert_eq!(context.reviewed_files, 50);
        assert_eq!(
            context.reviewed_files + context.skipped_files,
            context.total_files
        );
        assert!(context
            .warnings
            .iter()
            .any(|w| w.contains("60") && w.contains("50")));
        assert!(!context.from_cache);
    }

    #[tokio::test]
    async fn test_skip_reasons_in_order() {
        let files = vec![
            sample_file("a.rs", Some(&patch(2))),
            sample_file("logo.png", None),
            sample_file("Cargo.lock", Some(&patch(2))),
            sample_file("b.rs", Some(&patch(2))),
        ];
        let host = Arc::new(MockHost::new().with_files(files));
        let limits = ReviewLimits {
            max_files: 1,
            ignore_patterns: vec!["*.lock".to_string()],
            ..ReviewLimits::default()
        };
        let context = assembler(host, limits).assemble(&pr_url()).await.unwrap();

        let reasons: Vec<Option<SkipReason>> =
            context.files.iter().map(|f| f.skip_reason).collect();
        assert_eq!(
            reasons,
            vec![
                None,
                Some(SkipReason::FileLimit),
                Some(SkipReason::FileLimit),
                Some(SkipReason::FileLimit),
            ]
        );

        let host = Arc::new(MockHost::new().with_files(vec![
            sample_file("logo.png", None),
            sample_file("Cargo.lock", Some(&patch(2))),
            sample_file("empty.txt", Some("")),
        ]));
        let limits = ReviewLimits {
            ignore_patterns: vec!["*.lock".to_string()],
            ..ReviewLimits::default()
        };
        let context = assembler(host, limits).assemble(&pr_url()).await.unwrap();
        let reasons: Vec<Option<SkipReason>> =
            context.files.iter().map(|f| f.skip_reason).collect();
        assert_eq!(
            reasons,
            vec![
                Some(SkipReason::BinaryOrEmpty),
                Some(SkipReason::IgnorePattern),
                Some(SkipReason::BinaryOrEmpty),
            ]
        );
    }

    #[tokio::test]
    async fn test_cross_file_budget_reskips_and_keeps_counts() {
        let files = vec![
            sample_file("a.rs", Some(&patch(30))),
            sample_file("b.rs", Some(&patch(30))),
            sample_file("c.rs", Some(&patch(30))),
        ];
        let host = Arc::new(MockHost::new().with_files(files));
        let limits = ReviewLimits {
            max_total_lines: 40,
            ..ReviewLimits::default()
        };
        let context = assembler(host, limits).assemble(&pr_url()).await.unwrap();

        assert_eq!(context.reviewed_files, 2);
        assert_eq!(context.skipped_files, 1);
        assert_eq!(context.truncated_files, 1);
        assert!(context.files[1].truncated);
        assert_eq!(context.files[2].skip_reason, Some(SkipReason::DiffBudget));
        assert!(context.warnings.contains(&"1 file(s) truncated".to_string()));
        assert!(context.warnings.contains(&"1 file(s) skipped".to_string()));
        assert!(context.diff.contains("### b.rs"));
        assert!(!context.diff.contains("### c.rs"));
    }

    #[tokio::test]
    async fn test_per_file_truncation() {
        let host = Arc::new(MockHost::new().with_files(vec![sample_file("big.rs", Some(&patch(100)))]));
        let limits = ReviewLimits {
            max_lines_per_file: 10,
            ..ReviewLimits::default()
        };
        let context = assembler(host, limits).assemble(&pr_url()).await.unwrap();
        assert!(context.files[0].truncated);
        assert!(context.files[0]
            .patch
            .as_deref()
            .unwrap()
            .contains("lines omitted"));
        assert_eq!(context.truncated_files, 1);
    }

    #[tokio::test]
    async fn test_pagination_fetches_all_pages() {
        let files: Vec<_> = (0..250)
            .map(|i| sample_file(&format!("f{}.rs", i), Some("+x")))
            .collect();
        let host = Arc::new(MockHost::new().with_files(files));
        let context = assembler(host.clone(), ReviewLimits::default())
            .assemble(&pr_url())
            .await
            .unwrap();
        assert_eq!(context.total_files, 250);
        assert_eq!(host.count_calls("list_files:"), 3);
    }

    #[tokio::test]
    async fn test_pagination_stops_at_ceiling() {
        let files: Vec<_> = (0..3_050)
            .map(|i| sample_file(&format!("f{}.rs", i), Some("+x")))
            .collect();
        let host = Arc::new(MockHost::new().with_files(files));
        let context = assembler(host.clone(), ReviewLimits::default())
            .assemble(&pr_url())
            .await
            .unwrap();
        assert_eq!(context.total_files, 3_000);
        assert_eq!(host.count_calls("list_files:"), 30);
        assert!(context.warnings.iter().any(|w| w.contains("3050")));
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_pagination() {
        let host = Arc::new(MockHost::new().with_files(vec![sample_file("a.rs", Some("+x"))]));
        let assembler = assembler(host.clone(), ReviewLimits::default());

        let first = assembler.assemble(&pr_url()).await.unwrap();
        assert!(!first.from_cache);
        let second = assembler.assemble(&pr_url()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.commit_sha, first.commit_sha);
        assert_eq!(host.count_calls("list_files:"), 1);
        assert_eq!(host.count_calls("get_pull_request"), 2);
    }

    #[test]
    fn test_format_diff_marks_renames_and_truncation() {
        let mut file = ChangedFile::from(sample_file("new.rs", Some("+x")));
        file.status = FileStatus::Renamed;
        file.previous_filename = Some("old.rs".to_string());
        file.truncated = true;
        let diff = format_diff(&[file]);
        assert!(diff.starts_with("### new.rs (renamed, +1 -0) renamed from old.rs [truncated]"));
        assert!(diff.contains("```diff\n+x\n```"));
    }
}

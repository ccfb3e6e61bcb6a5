use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::github::PullRequestFile;

/// Change status of a file as reported by the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Removed,
    Modified,
    Renamed,
    Copied,
    Changed,
    Unchanged,
}

impl FileStatus {
    /// Unknown values collapse to `Changed`.
    pub fn parse(status: &str) -> Self {
        match status {
            "added" => FileStatus::Added,
            "removed" => FileStatus::Removed,
            "modified" => FileStatus::Modified,
            "renamed" => FileStatus::Renamed,
            "copied" => FileStatus::Copied,
            "unchanged" => FileStatus::Unchanged,
            _ => FileStatus::Changed,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Added => "added",
            FileStatus::Removed => "removed",
            FileStatus::Modified => "modified",
            FileStatus::Renamed => "renamed",
            FileStatus::Copied => "copied",
            FileStatus::Changed => "changed",
            FileStatus::Unchanged => "unchanged",
        };
        write!(f, "{}", s)
    }
}

/// Why a file was left out of the review context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    FileLimit,
    IgnorePattern,
    BinaryOrEmpty,
    DiffBudget,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::FileLimit => "file limit reached",
            SkipReason::IgnorePattern => "matches ignore pattern",
            SkipReason::BinaryOrEmpty => "binary or empty file",
            SkipReason::DiffBudget => "total diff budget exhausted",
        };
        write!(f, "{}", s)
    }
}

/// A single file within the PR, after budget and ignore rules were applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
    pub changes: usize,
    /// Possibly truncated patch text; `None` for skipped files
    pub patch: Option<String>,
    pub previous_filename: Option<String>,
    pub truncated: bool,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
}

impl ChangedFile {
    pub fn skip(&mut self, reason: SkipReason) {
        self.skipped = true;
        self.skip_reason = Some(reason);
        self.patch = None;
    }
}

impl From<PullRequestFile> for ChangedFile {
    fn from(file: PullRequestFile) -> Self {
        Self {
            status: FileStatus::parse(&file.status),
            filename: file.filename,
            additions: file.additions,
            deletions: file.deletions,
            changes: file.changes,
            patch: file.patch,
            previous_filename: file.previous_filename,
            truncated: false,
            skipped: false,
            skip_reason: None,
        }
    }
}

/// Size-bounded snapshot of one pull request at one head commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrContext {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub commit_sha: String,
    pub title: String,
    pub description: Option<String>,
    pub author: String,
    pub base_branch: String,
    pub head_branch: String,
    pub total_files: usize,
    pub reviewed_files: usize,
    pub skipped_files: usize,
    pub truncated_files: usize,
    pub total_additions: usize,
    pub total_deletions: usize,
    pub files: Vec<ChangedFile>,
    /// All reviewed diffs, formatted for prompts and reports
    pub diff: String,
    pub warnings: Vec<String>,
    /// Set when served from cache; never persisted as true
    #[serde(default, skip_serializing)]
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Budgets and filters applied while assembling a context.
#[derive(Debug, Clone)]
pub struct ReviewLimits {
    pub max_files: usize,
    pub max_lines_per_file: usize,
    pub max_chars_per_file: usize,
    pub max_total_lines: usize,
    pub ignore_patterns: Vec<String>,
}

impl Default for ReviewLimits {
    fn default() -> Self {
        Self {
            max_files: 50,
            max_lines_per_file: 500,
            max_chars_per_file: 20_000,
            max_total_lines: 3_000,
            ignore_patterns: Vec::new(),
        }
    }
}

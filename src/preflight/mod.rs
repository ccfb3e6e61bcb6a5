//! Syntax preflight: parse proposed file contents before anything is committed.
//!
//! This catches syntax errors only. It is not a compile or type check, and a
//! passing report says nothing about whether the code builds.

use std::fmt;
use std::path::Path;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::plan::ChangePlan;

/// Stop collecting after this many issues in one file.
const MAX_ISSUES_PER_FILE: usize = 20;
const SNIPPET_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Go,
    Json,
    Toml,
}

impl SourceLanguage {
    /// Language for a path by extension; `None` means no parser, pass through.
    pub fn detect(path: &str) -> Option<Self> {
        let ext = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(SourceLanguage::Rust),
            "js" | "jsx" | "mjs" | "cjs" => Some(SourceLanguage::JavaScript),
            "ts" | "mts" | "cts" => Some(SourceLanguage::TypeScript),
            "tsx" => Some(SourceLanguage::Tsx),
            "py" => Some(SourceLanguage::Python),
            "go" => Some(SourceLanguage::Go),
            "json" => Some(SourceLanguage::Json),
            "toml" => Some(SourceLanguage::Toml),
            _ => None,
        }
    }
}

impl fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceLanguage::Rust => "Rust",
            SourceLanguage::JavaScript => "JavaScript",
            SourceLanguage::TypeScript => "TypeScript",
            SourceLanguage::Tsx => "TSX",
            SourceLanguage::Python => "Python",
            SourceLanguage::Go => "Go",
            SourceLanguage::Json => "JSON",
            SourceLanguage::Toml => "TOML",
        };
        write!(f, "{}", s)
    }
}

/// One syntax problem; line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub path: String,
    pub language: Option<SourceLanguage>,
    pub issues: Vec<SyntaxIssue>,
}

impl FileCheck {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub files: Vec<FileCheck>,
    pub is_valid: bool,
}

impl PreflightReport {
    pub fn failed_files(&self) -> impl Iterator<Item = &FileCheck> {
        self.files.iter().filter(|f| !f.is_valid())
    }

    /// Markdown summary listing every issue by file.
    pub fn summary(&self) -> String {
        let failed: Vec<&FileCheck> = self.failed_files().collect();
        if failed.is_empty() {
            return format!("Syntax preflight passed for {} file(s).", self.files.len());
        }
        let mut out = format!(
            "Syntax preflight failed: {} of {} file(s) have syntax errors.\n",
            failed.len(),
            self.files.len()
        );
        for file in failed {
            let language = file
                .language
                .map(|l| format!(" ({})", l))
                .unwrap_or_default();
            out.push_str(&format!("\n- `{}`{}\n", file.path, language));
            for issue in &file.issues {
                out.push_str(&format!(
                    "  - line {}, column {}: {}\n",
                    issue.line, issue.column, issue.message
                ));
            }
        }
        out
    }
}

/// Check every change the engine would write.
pub fn check_plan(plan: &ChangePlan) -> PreflightReport {
    let files: Vec<FileCheck> = plan
        .files
        .iter()
        .filter(|change| change.is_applicable())
        .filter_map(|change| {
            let content = change.proposed_content.as_deref()?;
            Some(check_file(&change.path, content))
        })
        .collect();
    let is_valid = files.iter().all(FileCheck::is_valid);
    PreflightReport { files, is_valid }
}

pub fn check_file(path: &str, content: &str) -> FileCheck {
    let language = SourceLanguage::detect(path);
    let issues = match language {
        Some(language) => check_source(language, content),
        None => Vec::new(),
    };
    if !issues.is_empty() {
        debug!(path, issues = issues.len(), "syntax issues found");
    }
    FileCheck {
        path: path.to_string(),
        language,
        issues,
    }
}

pub fn check_source(language: SourceLanguage, content: &str) -> Vec<SyntaxIssue> {
    match language {
        SourceLanguage::Json => check_json(content),
        SourceLanguage::Toml => check_toml(content),
        _ => check_tree_sitter(language, content),
    }
}

fn parser_for(language: SourceLanguage) -> Option<Parser> {
    let grammar: tree_sitter::Language = match language {
        SourceLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
        SourceLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        SourceLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        SourceLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        SourceLanguage::Python => tree_sitter_python::LANGUAGE.into(),
        SourceLanguage::Go => tree_sitter_go::LANGUAGE.into(),
        SourceLanguage::Json | SourceLanguage::Toml => return None,
    };
    let mut parser = Parser::new();
    match parser.set_language(&grammar) {
        Ok(()) => Some(parser),
        Err(err) => {
            warn!(%language, %err, "failed to load grammar, skipping syntax check");
            None
        }
    }
}

fn check_tree_sitter(language: SourceLanguage, content: &str) -> Vec<SyntaxIssue> {
    let Some(mut parser) = parser_for(language) else {
        return Vec::new();
    };
    let Some(tree) = parser.parse(content, None) else {
        warn!(%language, "parser returned no tree, skipping syntax check");
        return Vec::new();
    };

    let root = tree.root_node();
    if !root.has_error() {
        return Vec::new();
    }
    let mut issues = Vec::new();
    collect_issues(root, content, &mut issues);
    if issues.is_empty() {
        issues.push(SyntaxIssue {
            line: 1,
            column: 1,
            message: "syntax error".to_string(),
        });
    }
    issues
}

fn collect_issues(node: Node, source: &str, issues: &mut Vec<SyntaxIssue>) {
    if issues.len() >= MAX_ISSUES_PER_FILE {
        return;
    }
    let position = node.start_position();
    if node.is_missing() {
        issues.push(SyntaxIssue {
            line: position.row + 1,
            column: position.column + 1,
            message: format!("missing `{}`", node.kind()),
        });
        return;
    }
    if node.is_error() {
        let text = node.utf8_text(source.as_bytes()).unwrap_or_default();
        let snippet: String = text
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .chars()
            .take(SNIPPET_CHARS)
            .collect();
        let message = if snippet.is_empty() {
            "syntax error".to_string()
        } else {
            format!("syntax error near `{}`", snippet)
        };
        issues.push(SyntaxIssue {
            line: position.row + 1,
            column: position.column + 1,
            message,
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_issues(child, source, issues);
    }
}

fn check_json(content: &str) -> Vec<SyntaxIssue> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(_) => Vec::new(),
        Err(err) => vec![SyntaxIssue {
            line: err.line().max(1),
            column: err.column().max(1),
            message: err.to_string(),
        }],
    }
}

fn check_toml(content: &str) -> Vec<SyntaxIssue> {
    match content.parse::<toml::Table>() {
        Ok(_) => Vec::new(),
        Err(err) => {
            let (line, column) = err
                .span()
                .map(|span| line_column(content, span.start))
                .unwrap_or((1, 1));
            vec![SyntaxIssue {
                line,
                column,
                message: err.message().to_string(),
            }]
        }
    }
}

/// 1-based line and column of a byte offset.
fn line_column(content: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(content.len());
    let before = content.get(..offset).unwrap_or(content);
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map(|nl| before.len() - nl)
        .unwrap_or(before.len() + 1);
    (line, column)
}

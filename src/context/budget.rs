//! Diff budgeting: bound how much diff text reaches prompts and reports.
//!
//! Two independent caps apply. [`truncate_file`] bounds one file by lines and
//! characters; [`truncate_across_files`] shares a line budget across files in
//! input order, so earlier files win.

/// Body used for a file the shared budget could not fit.
pub const SKIPPED_SENTINEL: &str = "[diff omitted: total diff budget exhausted]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedDiff {
    pub content: String,
    pub truncated: bool,
    pub original_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetedDiff {
    pub content: String,
    pub truncated: bool,
    pub skipped: bool,
}

fn omitted_marker(omitted: usize) -> String {
    format!("... [{} lines omitted] ...", omitted)
}

fn size_marker(max_chars: usize) -> String {
    format!("\n... [truncated: diff exceeds {} characters]", max_chars)
}

/// Bound a single diff to `max_lines` lines and `max_chars` characters.
///
/// Over the line cap, the first and last `max_lines / 2` lines survive around
/// an omission marker. Over the character cap, the text is cut so that text
/// plus marker still fits in `max_chars`.
pub fn truncate_file(diff: &str, max_lines: usize, max_chars: usize) -> TruncatedDiff {
    let lines: Vec<&str> = diff.lines().collect();
    let original_lines = lines.len();
    let mut truncated = false;

    let mut content = if original_lines > max_lines {
        truncated = true;
        let half = max_lines / 2;
        let omitted = original_lines - 2 * half;
        let mut kept: Vec<String> = Vec::with_capacity(2 * half + 1);
        kept.extend(lines[..half].iter().map(|l| l.to_string()));
        kept.push(omitted_marker(omitted));
        kept.extend(lines[original_lines - half..].iter().map(|l| l.to_string()));
        kept.join("\n")
    } else {
        diff.to_string()
    };

    if content.chars().count() > max_chars {
        truncated = true;
        let marker = size_marker(max_chars);
        let marker_len = marker.chars().count();
        content = if max_chars > marker_len {
            let cut: String = content.chars().take(max_chars - marker_len).collect();
            format!("{}{}", cut, marker)
        } else {
            content.chars().take(max_chars).collect()
        };
    }

    TruncatedDiff {
        content,
        truncated,
        original_lines,
    }
}

/// Share `max_total_lines` across `diffs` in order.
///
/// A diff that fits is kept as-is. The diff that crosses the remaining budget
/// is truncated to exactly what remains, and every diff after it is skipped.
pub fn truncate_across_files<S: AsRef<str>>(
    diffs: &[S],
    max_total_lines: usize,
    max_chars: usize,
) -> Vec<BudgetedDiff> {
    let mut used = 0usize;
    let mut out = Vec::with_capacity(diffs.len());

    for diff in diffs {
        let diff = diff.as_ref();
        let remaining = max_total_lines.saturating_sub(used);
        if remaining == 0 {
            out.push(BudgetedDiff {
                content: SKIPPED_SENTINEL.to_string(),
                truncated: false,
                skipped: true,
            });
            continue;
        }

        let lines = diff.lines().count();
        if lines <= remaining {
            used += lines;
            out.push(BudgetedDiff {
                content: diff.to_string(),
                truncated: false,
                skipped: false,
            });
        } else {
            let result = truncate_file(diff, remaining, max_chars);
            used = max_total_lines;
            out.push(BudgetedDiff {
                content: result.content,
                truncated: true,
                skipped: false,
            });
        }
    }

    out
}

use glob::{MatchOptions, Pattern};
use tracing::warn;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob-based ignore rules for changed files.
///
/// `*` matches within one path segment, `**` across segments. A pattern
/// matches when it covers any run of whole segments: the bare filename, the
/// full path, or a directory somewhere along it.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Compile `patterns`; invalid ones are logged and dropped.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(pattern = %raw, %err, "invalid ignore pattern, skipping");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for start in 0..segments.len() {
            for end in start..segments.len() {
                let candidate = segments[start..=end].join("/");
                if self
                    .patterns
                    .iter()
                    .any(|p| p.matches_with(&candidate, MATCH_OPTIONS))
                {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> IgnoreMatcher {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        IgnoreMatcher::new(&owned)
    }

    #[test]
    fn test_star_matches_bare_filename_anywhere() {
        let m = matcher(&["*.lock"]);
        assert!(m.is_ignored("Cargo.lock"));
        assert!(m.is_ignored("frontend/yarn.lock"));
        assert!(!m.is_ignored("src/lock.rs"));
    }

    #[test]
    fn test_star_does_not_cross_separators() {
        let m = matcher(&["src/*.rs"]);
        assert!(m.is_ignored("src/main.rs"));
        assert!(!m.is_ignored("src/nested/main.rs"));
    }

    #[test]
    fn test_double_star_crosses_separators() {
        let m = matcher(&["dist/**"]);
        assert!(m.is_ignored("dist/app.js"));
        assert!(m.is_ignored("dist/assets/img/logo.svg"));
        assert!(m.is_ignored("web/dist/app.js"));
        assert!(!m.is_ignored("src/dist.rs"));
    }

    #[test]
    fn test_leading_double_star() {
        let m = matcher(&["**/*.min.js"]);
        assert!(m.is_ignored("vendor/jquery.min.js"));
        assert!(m.is_ignored("a/b/c/app.min.js"));
        assert!(!m.is_ignored("app.js"));
    }

    #[test]
    fn test_directory_name_matches_any_segment() {
        let m = matcher(&["node_modules"]);
        assert!(m.is_ignored("node_modules/left-pad/index.js"));
        assert!(m.is_ignored("packages/ui/node_modules/x.js"));
        assert!(!m.is_ignored("src/node_modules_helper.rs"));
    }

    #[test]
    fn test_literal_dots_next_to_wildcards() {
        let m = matcher(&["*.min.js"]);
        assert!(m.is_ignored("app.min.js"));
        assert!(!m.is_ignored("app_minxjs"));
        assert!(!m.is_ignored("appXminXjs"));

        let m = matcher(&["package-lock.json"]);
        assert!(!m.is_ignored("package-lockxjson"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        let m = matcher(&["v?.txt", "[ab].cfg"]);
        assert!(m.is_ignored("v1.txt"));
        assert!(m.is_ignored("conf/a.cfg"));
        assert!(!m.is_ignored("c.cfg"));
    }

    #[test]
    fn test_invalid_pattern_is_dropped() {
        let m = matcher(&["src/**.rs", "*.snap"]);
        assert!(m.is_ignored("tests/a.snap"));
        assert!(!m.is_ignored("src/lib.rs"));
    }

    #[test]
    fn test_empty_matcher_ignores_nothing() {
        let m = IgnoreMatcher::default();
        assert!(!m.is_ignored("anything.lock"));
    }
}

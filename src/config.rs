use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ai::retry::RetryPolicy;
use crate::context::types::ReviewLimits;
use crate::plan::types::SafetyLimits;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = ".pr-fixer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from .pr-fixer.toml.
/// All sections are optional. The tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    /// Diff budgets and ignore rules for context assembly
    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Safety limits applied to every generated plan
    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub plans: PlansConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. [`Config::load`] fills it from GITHUB_TOKEN when unset.
    pub token: Option<String>,
    /// API root, overridable for GitHub Enterprise
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub max_files: usize,
    pub max_lines_per_file: usize,
    pub max_chars_per_file: usize,
    pub max_total_lines: usize,
    pub ignore_patterns: Vec<String>,
}

impl Default for ReviewConfig {
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

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3_600 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_files_per_pr: usize,
    pub max_lines_changed: usize,
    /// Per-repository overrides keyed by "owner/repo"
    pub repos: HashMap<String, RepoSafetyOverride>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_files_per_pr: 10,
            max_lines_changed: 500,
            repos: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoSafetyOverride {
    pub max_files_per_pr: Option<usize>,
    pub max_lines_changed: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlansConfig {
    /// SQLite database holding plans and cached contexts
    pub database: PathBuf,
    pub expiry_hours: i64,
    pub sweep_interval_secs: u64,
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("pr-fixer.db"),
            expiry_hours: 24,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub preflight: bool,
    pub impact_analysis: bool,
    pub branch_prefix: String,
    pub labels: Vec<String>,
    /// Repository permissions allowed to approve a plan
    pub allowed_permissions: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            preflight: true,
            impact_analysis: true,
            branch_prefix: "ai-fix".to_string(),
            labels: vec!["ai-generated".to_string()],
            allowed_permissions: vec![
                "admin".to_string(),
                "maintain".to_string(),
                "write".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub providers: Vec<ProviderConfig>,
    pub retry: RetryConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 8_192,
            providers: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// One OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 30_000,
            max_attempts: 4,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from .pr-fixer.toml in the current
    /// directory. Returns the default config if no file exists.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Path::new(CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)?
                } else {
                    Config::default()
                }
            }
        };

        if config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                config.github.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn review_limits(&self) -> ReviewLimits {
        ReviewLimits {
            max_files: self.review.max_files,
            max_lines_per_file: self.review.max_lines_per_file,
            max_chars_per_file: self.review.max_chars_per_file,
            max_total_lines: self.review.max_total_lines,
            ignore_patterns: self.review.ignore_patterns.clone(),
        }
    }

    /// Safety limits for one repository, with per-repo overrides applied.
    pub fn safety_limits(&self, owner: &str, repo: &str) -> SafetyLimits {
        let key = format!("{}/{}", owner, repo);
        let overrides = self.safety.repos.get(&key);
        SafetyLimits {
            max_files: overrides
                .and_then(|o| o.max_files_per_pr)
                .unwrap_or(self.safety.max_files_per_pr),
            max_lines_changed: overrides
                .and_then(|o| o.max_lines_changed)
                .unwrap_or(self.safety.max_lines_changed),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn plan_expiry(&self) -> chrono::Duration {
        chrono::Duration::hours(self.plans.expiry_hours)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.ai.retry.base_delay_ms),
            multiplier: self.ai.retry.multiplier,
            max_delay: Duration::from_millis(self.ai.retry.max_delay_ms),
            max_attempts: self.ai.retry.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.review.max_files, 50);
        assert_eq!(config.plans.expiry_hours, 24);
        assert!(config.execution.preflight);
        assert!(config.ai.providers.is_empty());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[review]
max_files = 20
ignore_patterns = ["*.lock", "dist/**"]

[safety]
max_files_per_pr = 5

[safety.repos."acme/api"]
max_lines_changed = 50

[[ai.providers]]
name = "primary"
base_url = "https://api.openai.com/v1"
model = "gpt-4o"
api_key_env = "OPENAI_API_KEY"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.review.max_files, 20);
        assert_eq!(config.review.max_total_lines, 3_000);
        assert_eq!(config.review.ignore_patterns.len(), 2);
        assert_eq!(config.safety.max_files_per_pr, 5);
        assert_eq!(config.ai.providers.len(), 1);
        assert_eq!(config.ai.retry.max_attempts, 4);
    }

    #[test]
    fn test_safety_limits_apply_repo_override() {
        let toml_str = r#"
[safety]
max_files_per_pr = 5
max_lines_changed = 400

[safety.repos."acme/api"]
max_lines_changed = 50
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let limits = config.safety_limits("acme", "api");
        assert_eq!(limits.max_files, 5);
        assert_eq!(limits.max_lines_changed, 50);

        let other = config.safety_limits("acme", "web");
        assert_eq!(other.max_lines_changed, 400);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[plans]\nexpiry_hours = 12\n[cache]\nttl_secs = 60").unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.plans.expiry_hours, 12);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.plan_expiry(), chrono::Duration::hours(12));
    }

    #[test]
    fn test_load_keeps_token_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[github]\ntoken = \"from-file\"").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.github.token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_load_from_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[review\nmax_files = ").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}

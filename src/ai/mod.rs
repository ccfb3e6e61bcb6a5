//! AI providers and the fallback chain used to generate change plans.

pub mod http;
pub mod planner;
pub mod retry;

pub use http::HttpProvider;
pub use planner::generate_change_plan;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::plan::PlanError;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} returned HTTP {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("Failed to decode {provider} response: {message}")]
    Decode { provider: String, message: String },

    #[error("All AI providers failed: {}", .0.join("; "))]
    AllProvidersFailed(Vec<String>),

    #[error("Model output is not a usable change plan: {0}")]
    Plan(#[from] PlanError),
}

impl AiError {
    /// Rate limits, server errors and dropped connections are worth retrying.
    /// Timeouts are not: the provider may still be working on the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Api { status, .. } => *status == 429 || (500..=599).contains(status),
            AiError::Request(err) => err.is_connect() || is_connection_reset(err),
            _ => false,
        }
    }
}

/// Walks the source chain looking for a connection torn down by the peer.
fn is_connection_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = current.source();
    }
    false
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 8_192,
        }
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    /// False when the provider cannot be called at all (e.g. no API key).
    fn is_available(&self) -> bool;

    async fn generate(&self, prompt: &Prompt, options: &GenerateOptions)
        -> Result<String, AiError>;
}

/// A completion and the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub provider: String,
    pub text: String,
}

/// Tries providers in order, retrying each on transient errors before
/// falling through to the next.
pub struct ProviderChain {
    providers: Vec<Arc<dyn AiProvider>>,
    retry: RetryPolicy,
    options: GenerateOptions,
}

impl ProviderChain {
    pub fn new(
        providers: Vec<Arc<dyn AiProvider>>,
        retry: RetryPolicy,
        options: GenerateOptions,
    ) -> Self {
        Self {
            providers,
            retry,
            options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let providers = config
            .ai
            .providers
            .iter()
            .map(|p| Arc::new(HttpProvider::from_config(p)) as Arc<dyn AiProvider>)
            .collect();
        let options = GenerateOptions {
            temperature: config.ai.temperature,
            max_tokens: config.ai.max_tokens,
        };
        Self::new(providers, config.retry_policy(), options)
    }

    #[instrument(skip_all, fields(providers = self.providers.len()))]
    pub async fn generate(&self, prompt: &Prompt) -> Result<Completion, AiError> {
        let mut failures = Vec::new();
        if self.providers.is_empty() {
            failures.push("no AI providers configured".to_string());
        }

        for provider in &self.providers {
            let name = provider.name().to_string();
            if !provider.is_available() {
                debug!(provider = %name, "provider unavailable, skipping");
                failures.push(format!("{}: unavailable", name));
                continue;
            }

            let result = retry::with_retry(&self.retry, &name, || {
                provider.generate(prompt, &self.options)
            })
            .await;

            match result {
                Ok(text) if text.trim().is_empty() => {
                    warn!(provider = %name, "empty completion, trying next provider");
                    failures.push(AiError::EmptyResponse(name).to_string());
                }
                Ok(text) => {
                    info!(provider = %name, chars = text.len(), "completion received");
                    return Ok(Completion { provider: name, text });
                }
                Err(err) => {
                    warn!(provider = %name, %err, "provider failed, trying next provider");
                    failures.push(format!("{}: {}", name, err));
                }
            }
        }

        Err(AiError::AllProvidersFailed(failures))
    }
}

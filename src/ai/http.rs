use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{AiError, AiProvider, GenerateOptions, Prompt};
use crate::config::ProviderConfig;

/// Any OpenAI-compatible chat-completions endpoint.
pub struct HttpProvider {
    name: String,
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl HttpProvider {
    pub fn new(name: &str, base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            http: Client::new(),
            endpoint: chat_endpoint(base_url),
            model: model.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    /// The API key is read from the configured environment variable once, here.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(&config.name, &config.base_url, &config.model, api_key)
    }

    fn request_body<'a>(&'a self, prompt: &'a Prompt, options: &GenerateOptions) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        }
    }

    fn parse_response(&self, text: &str) -> Result<String, AiError> {
        let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| AiError::Decode {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AiError::EmptyResponse(self.name.clone()))
    }

    fn api_error(&self, status: u16, body: &str) -> AiError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| body.chars().take(200).collect());
        AiError::Api {
            provider: self.name.clone(),
            status,
            message,
        }
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl AiProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    #[instrument(skip(self, prompt, options), fields(provider = %self.name, model = %self.model))]
    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<String, AiError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&self.request_body(prompt, options));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(status = status.as_u16(), bytes = text.len(), "chat completion response");

        if !status.is_success() {
            return Err(self.api_error(status.as_u16(), &text));
        }
        self.parse_response(&text)
    }
}

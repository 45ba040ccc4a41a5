//! LLM gateway for structured generation.
//!
//! One `ChatBackend` seam for everything that talks to a model: the
//! reqwest-backed [`LlmGateway`] speaks the OpenAI chat-completions shape
//! (OpenAI itself, vLLM, any compatible server) and the native Ollama
//! `/api/chat` endpoint. Responses are plain strings; [`parse_structured`]
//! turns them into typed values via a tolerant JSON extraction ladder.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Result, ToolError};

/// Default base URL for the OpenAI provider.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default base URL for a local Ollama daemon.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Which chat API dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatProvider {
    /// OpenAI's hosted API.
    OpenAi,

    /// A local or remote Ollama daemon (`/api/chat`).
    Ollama,

    /// A vLLM server exposing the OpenAI-compatible surface.
    Vllm,

    /// Any other OpenAI-compatible endpoint.
    Generic,
}

impl ChatProvider {
    /// Canonical configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Vllm => "vllm",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for ChatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatProvider {
    type Err = ToolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "vllm" => Ok(Self::Vllm),
            "generic" | "generic_openai" => Ok(Self::Generic),
            other => Err(ToolError::Gateway(format!(
                "unknown chat provider {other:?} (expected openai, ollama, vllm, or generic)"
            ))),
        }
    }
}

/// Connection settings for a chat endpoint.
///
/// Everything is explicit; nothing here reads the environment. Demo
/// binaries that want env-driven setup do their own reading and build one
/// of these.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// API dialect.
    pub provider: ChatProvider,

    /// Base URL, without the endpoint path.
    pub base_url: String,

    /// Bearer token, if the endpoint wants one.
    pub api_key: Option<String>,

    /// Model identifier passed through verbatim.
    pub model: String,

    /// Sampling temperature. Low by default; generated source should be
    /// boring.
    pub temperature: f32,

    /// Completion token cap (`max_tokens` / `num_predict`).
    pub max_tokens: Option<u32>,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl GatewayConfig {
    fn defaults(provider: ChatProvider, base_url: &str, model: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.to_string(),
            api_key: None,
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Configuration for the hosted OpenAI API. Needs an API key before
    /// requests will succeed.
    pub fn openai(model: impl Into<String>) -> Self {
        Self::defaults(ChatProvider::OpenAi, DEFAULT_OPENAI_BASE_URL, model)
    }

    /// Configuration for a local Ollama daemon.
    pub fn ollama(model: impl Into<String>) -> Self {
        Self::defaults(ChatProvider::Ollama, DEFAULT_OLLAMA_BASE_URL, model)
    }

    /// Configuration for a vLLM or other OpenAI-compatible server. These
    /// have no well-known address, so the base URL is required up front.
    pub fn openai_compatible(
        provider: ChatProvider,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let mut config = Self::defaults(provider, "", model);
        config.base_url = base_url.into();
        config
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set or clear the completion token cap.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A system/user message pair. All the lifecycle prompts fit this shape.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System prompt setting the output contract.
    pub system: String,

    /// The actual ask.
    pub user: String,
}

impl ChatRequest {
    /// Create a request from a system and user message.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Anything that can answer a chat request with text.
///
/// The manager only ever sees this trait, so tests swap in scripted fakes
/// and never touch the network.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete the request and return the raw response text.
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}

/// HTTP chat client for every supported provider.
pub struct LlmGateway {
    config: GatewayConfig,
    client: Client,
}

impl LlmGateway {
    /// Create a gateway from explicit configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// The configuration this gateway was built with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn complete_openai(&self, request: &ChatRequest) -> Result<String> {
        let url = self.endpoint("/chat/completions");

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": self.config.temperature,
            "stream": false,
            "response_format": {"type": "json_object"},
        });
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let mut builder = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Gateway(format!(
                "chat API returned {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(map_reqwest_error)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ToolError::Gateway("chat response contained no choices".to_string()))
    }

    async fn complete_ollama(&self, request: &ChatRequest) -> Result<String> {
        let url = self.endpoint("/api/chat");

        // Ollama takes the token cap as options.num_predict
        let mut options = serde_json::json!({ "temperature": self.config.temperature });
        if let Some(max_tokens) = self.config.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "stream": false,
            "format": "json",
            "options": options,
        });

        let response = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Gateway(format!(
                "ollama returned {status}: {text}"
            )));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(map_reqwest_error)?;
        parsed
            .message
            .map(|message| message.content)
            .ok_or_else(|| ToolError::Gateway("ollama response contained no message".to_string()))
    }
}

#[async_trait]
impl ChatBackend for LlmGateway {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        debug!(
            "Requesting completion from {} ({})",
            self.config.provider, self.config.model
        );

        match self.config.provider {
            ChatProvider::Ollama => self.complete_ollama(&request).await,
            ChatProvider::OpenAi | ChatProvider::Vllm | ChatProvider::Generic => {
                self.complete_openai(&request).await
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout(format!("chat request timed out: {e}"))
    } else {
        ToolError::Gateway(e.to_string())
    }
}

/// Pull a JSON object out of a model response.
///
/// Models asked for JSON still wrap it in prose or markdown often enough
/// that a strict parse is not an option. The ladder: direct parse, then a
/// fenced code block, then the first balanced `{...}` in the text. Nothing
/// usable on any rung is a [`ToolError::MalformedResponse`].
pub fn extract_json(response: &str) -> Result<serde_json::Value> {
    let trimmed = response.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed)
        && value.is_object()
    {
        return Ok(value);
    }

    if let Some(block) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(block)
        && value.is_object()
    {
        return Ok(value);
    }

    if let Some(candidate) = first_balanced_object(trimmed)
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate)
    {
        return Ok(value);
    }

    let snippet: String = trimmed.chars().take(120).collect();
    Err(ToolError::MalformedResponse(format!(
        "no JSON object found in response: {snippet:?}"
    )))
}

/// Deserialize a model response into a typed value via [`extract_json`].
pub fn parse_structured<T: DeserializeOwned>(response: &str) -> Result<T> {
    let value = extract_json(response)?;
    serde_json::from_value(value).map_err(|e| {
        ToolError::MalformedResponse(format!("response JSON did not match the expected shape: {e}"))
    })
}

/// Contents of the first ``` fence, with an optional `json` tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// First balanced top-level `{...}` span, string-literal aware.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in text.as_bytes()[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    // '}' is ASCII, so this is a char boundary
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

// Chat API response types

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

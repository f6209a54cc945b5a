//! Ollama API client

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::backend::ChatBackend;
use crate::chat::{ChatMessage, ChatOptions, ChatResponse, ToolDefinition};
use crate::config::LlmConfig;
use crate::retry::{is_retryable_error, is_retryable_status, RetryConfig};

/// Model information from Ollama API
#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub name: String,
    pub size: u64,
    pub digest: String,
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<Model>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
    options: &'a ChatOptions,
}

/// Failure of a single attempt, tagged with whether another attempt may help
struct AttemptError {
    retryable: bool,
    error: anyhow::Error,
}

impl AttemptError {
    fn fatal(error: anyhow::Error) -> Self {
        Self {
            retryable: false,
            error,
        }
    }
}

/// Ollama API client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OllamaClient {
    /// Create a new client with the given per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into(),
            client,
            retry: RetryConfig::default(),
        })
    }

    /// Create a client from the `[llm]` configuration table
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(config.base_url(), Duration::from_secs(config.timeout_secs))?
            .with_retry(config.retry.clone()))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is running
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// List all available models
    pub async fn list_models(&self) -> Result<Vec<Model>> {
        let url = format!("{}/api/tags", self.base_url);

        let resp: TagsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to Ollama")?
            .json()
            .await
            .context("Failed to parse models response")?;

        Ok(resp.models)
    }

    /// Non-streaming chat with optional tools, retried on transport failures
    #[instrument(skip(self, messages, tools, options), fields(messages = messages.len()))]
    pub async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model,
            messages,
            tools,
            stream: false,
            options,
        };

        let mut attempt = 0;
        loop {
            match self.send_chat(&url, &request).await {
                Ok(response) => {
                    debug!(
                        attempt,
                        tool_calls = response.message.tool_calls.len(),
                        eval_count = ?response.eval_count,
                        "Chat response received"
                    );
                    return Ok(response);
                }
                Err(e) if e.retryable && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.error,
                        "Chat request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.error.context(format!(
                        "Chat request to {} failed after {} attempt(s)",
                        url,
                        attempt + 1
                    )))
                }
            }
        }
    }

    async fn send_chat(&self, url: &str, request: &ChatRequest<'_>) -> Result<ChatResponse, AttemptError> {
        let resp = self.client.post(url).json(request).send().await.map_err(|e| AttemptError {
            retryable: is_retryable_error(&e),
            error: anyhow!(e).context("Failed to connect to Ollama"),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptError {
                retryable: is_retryable_status(status),
                error: anyhow!("Ollama returned {}: {}", status, body.trim()),
            });
        }

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| AttemptError::fatal(anyhow!(e).context("Failed to parse chat response")))
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        self.chat_with_tools(model, messages, tools, options).await
    }
}

impl Model {
    /// Get human-readable size
    pub fn size_human(&self) -> String {
        let gb = self.size as f64 / (1024.0 * 1024.0 * 1024.0);
        format!("{:.1} GB", gb)
    }
}

//! Configuration for the LLM endpoint

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// The `[llm]` configuration table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub host: String,
    pub port: u16,
    /// Model used by every agent
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
            temperature: 0.0,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Get Ollama base URL
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

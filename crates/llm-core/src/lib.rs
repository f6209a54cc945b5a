//! llm-core: LLM service access for the relay agents
//!
//! Provides:
//! - Configuration for the LLM endpoint (`[llm]` table)
//! - Ollama chat client with tool calling
//! - Retry with exponential backoff for transport failures
//! - The `ChatBackend` seam the agents are written against

pub mod backend;
pub mod chat;
pub mod config;
pub mod ollama;
pub mod retry;

pub use backend::ChatBackend;
pub use chat::{
    AssistantMessage, ChatMessage, ChatOptions, ChatResponse, FunctionCall, FunctionDefinition,
    Role, ToolCall, ToolDefinition,
};
pub use config::LlmConfig;
pub use ollama::{Model, OllamaClient};
pub use retry::RetryConfig;

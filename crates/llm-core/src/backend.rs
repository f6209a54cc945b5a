//! The chat backend seam

use anyhow::Result;
use async_trait::async_trait;

use crate::chat::{ChatMessage, ChatOptions, ChatResponse, ToolDefinition};

/// Anything that can answer a chat request with optional tool calling
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: &ChatOptions,
    ) -> Result<ChatResponse>;
}

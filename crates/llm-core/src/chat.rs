//! Chat message and tool-calling wire types

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => bail!("Unknown message role: {}", other),
        }
    }
}

/// A role-tagged message sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Ollama sends an object, OpenAI-style servers send a JSON-encoded string
    #[serde(default)]
    pub arguments: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as a JSON object, decoding the string form if needed
    pub fn arguments_object(&self) -> Result<Map<String, Value>> {
        match &self.arguments {
            Value::Object(map) => Ok(map.clone()),
            Value::String(raw) => {
                let parsed: Value = serde_json::from_str(raw)
                    .with_context(|| format!("Arguments of '{}' are not valid JSON", self.name))?;
                match parsed {
                    Value::Object(map) => Ok(map),
                    other => bail!("Arguments of '{}' are not an object: {}", self.name, other),
                }
            }
            Value::Null => Ok(Map::new()),
            other => bail!("Arguments of '{}' are not an object: {}", self.name, other),
        }
    }

    /// Arguments rendered as a compact JSON string
    pub fn arguments_json(&self) -> String {
        match &self.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// Sampling options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

/// The assistant side of a chat response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: String::new(),
                function: FunctionCall::new(name, arguments),
            }],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Non-streaming chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    pub message: AssistantMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl ChatResponse {
    pub fn new(message: AssistantMessage) -> Self {
        Self {
            model: String::new(),
            message,
            done: true,
            prompt_eval_count: None,
            eval_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arguments_object_from_object() {
        let call = FunctionCall::new("exit", json!({"output": "done"}));
        let args = call.arguments_object().unwrap();
        assert_eq!(args["output"], "done");
    }

    #[test]
    fn test_arguments_object_from_encoded_string() {
        let call = FunctionCall::new("execute_code", json!("{\"code\":\"print(1)\"}"));
        let args = call.arguments_object().unwrap();
        assert_eq!(args["code"], "print(1)");
        assert_eq!(call.arguments_json(), "{\"code\":\"print(1)\"}");
    }

    #[test]
    fn test_arguments_object_rejects_non_object() {
        let call = FunctionCall::new("exit", json!("[1, 2]"));
        assert!(call.arguments_object().is_err());

        let call = FunctionCall::new("exit", json!(42));
        assert!(call.arguments_object().is_err());
    }

    #[test]
    fn test_parse_ollama_response_with_tool_calls() {
        let body = r#"{
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "programmer", "arguments": {"output": "sum 1..10"}}}
                ]
            },
            "done": true,
            "eval_count": 12
        }"#;

        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(resp.message.has_tool_calls());
        assert_eq!(resp.message.tool_calls[0].function.name, "programmer");
        assert_eq!(resp.eval_count, Some(12));
    }

    #[test]
    fn test_parse_plain_text_response() {
        let body = r#"{"message": {"role": "assistant", "content": "What budget?"}, "done": true}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(!resp.message.has_tool_calls());
        assert_eq!(resp.message.content, "What budget?");
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("narrator".parse::<Role>().is_err());
    }
}

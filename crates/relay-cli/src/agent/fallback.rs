//! Tool calls written into message text
//!
//! Smaller local models often answer with JSON in the content field instead of
//! native tool calls. Objects shaped like `{"name": ..., "arguments": ...}` or
//! the recorded form `{"function": ..., "arguments": ...}` are picked up, but
//! only when the name belongs to the agent's toolbox; anything else stays
//! plain text.

use llm_core::FunctionCall;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::Toolbox;

#[derive(Deserialize)]
struct TextToolCall {
    #[serde(alias = "function")]
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Tool calls embedded in `content`, in order of appearance
pub fn extract_tool_calls(content: &str, toolbox: &Toolbox) -> Vec<FunctionCall> {
    let known = |call: &TextToolCall| toolbox.tools().iter().any(|t| t.name() == call.name);

    json_objects(content)
        .into_iter()
        .filter_map(|object| serde_json::from_value::<TextToolCall>(object).ok())
        .filter(|call| known(call))
        .map(|call| FunctionCall::new(call.name, call.arguments))
        .collect()
}

/// JSON objects embedded in prose. A `{` that does not start a valid object
/// is skipped and the scan resumes at the next one.
fn json_objects(content: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut pos = 0;

    while let Some(offset) = content[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&content[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => {
                objects.push(value);
                pos = start + stream.byte_offset();
            }
            _ => pos = start + 1,
        }
    }
    objects
}

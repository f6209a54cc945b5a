//! The closed set of tools an agent can be handed
//!
//! Every agent carries `exit`; the converser adds a hand-off tool, the coder
//! adds `execute_code`. Calls coming back from the model are parsed against
//! the agent's own toolbox, so an unknown name never reaches dispatch.

pub mod sandbox;

use llm_core::{FunctionCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use sandbox::Script;

/// Signal returned when an agent calls `exit`
pub const EXIT_SIGNAL: &str = "exit";
pub const EXECUTE_CODE: &str = "execute_code";

/// Tool parsing failures. Both are contract mismatches with the model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    Unknown(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterProperty>>,
}

impl ParameterProperty {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            param_type: "string".to_string(),
            description: description.into(),
            items: None,
        }
    }

    pub fn string_array(description: impl Into<String>) -> Self {
        Self {
            param_type: "array".to_string(),
            description: description.into(),
            items: Some(Box::new(Self::string("Item"))),
        }
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties")]
    pub additional_properties: bool,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool an agent may be given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    /// Ends the agent's turn with signal `exit`
    Exit,
    /// Ends the turn with the tool's own name as the signal
    Handoff { name: String, description: String },
    /// Runs code in the sandbox and keeps the turn going
    ExecuteCode,
}

impl ToolKind {
    /// The converser's hand-off to the coder
    pub fn programmer() -> Self {
        Self::Handoff {
            name: "programmer".to_string(),
            description: "Once you are done gathering the task requirements, call this tool to write, test, and execute python code. It will return the output of the code.".to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Exit => EXIT_SIGNAL,
            Self::Handoff { name, .. } => name,
            Self::ExecuteCode => EXECUTE_CODE,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Exit => "Once you are done with your task, call this tool to end the conversation.",
            Self::Handoff { description, .. } => description,
            Self::ExecuteCode => "Execute a python script and return its output.",
        }
    }

    pub fn parameters_schema(&self) -> ParameterSchema {
        match self {
            Self::Exit | Self::Handoff { .. } => ParameterSchema::new()
                .with_required("output", ParameterProperty::string("The output for your task")),
            Self::ExecuteCode => ParameterSchema::new()
                .with_required("code", ParameterProperty::string("The Python code snippet to be executed"))
                .with_property(
                    "packages",
                    ParameterProperty::string_array("Third-party packages the script needs installed"),
                ),
        }
    }

    pub fn to_definition(&self) -> ToolDefinition {
        let parameters = serde_json::to_value(self.parameters_schema()).unwrap_or_default();
        ToolDefinition::function(self.name(), self.description(), parameters)
    }
}

/// A parsed tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    Exit { output: String },
    Handoff { signal: String, output: String },
    ExecuteCode(Script),
}

/// The fixed tool set of one agent
#[derive(Debug, Clone)]
pub struct Toolbox {
    tools: Vec<ToolKind>,
}

impl Toolbox {
    /// `exit` followed by the given tools
    pub fn with_exit(tools: impl IntoIterator<Item = ToolKind>) -> Self {
        let mut all = vec![ToolKind::Exit];
        all.extend(tools.into_iter().filter(|t| *t != ToolKind::Exit));
        Self { tools: all }
    }

    pub fn tools(&self) -> &[ToolKind] {
        &self.tools
    }

    pub fn contains(&self, kind: &ToolKind) -> bool {
        self.tools.contains(kind)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolKind::to_definition).collect()
    }

    /// One `name: description` line per tool
    pub fn summary(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolve a model tool call against this toolbox
    pub fn parse(&self, call: &FunctionCall) -> Result<ToolInvocation, ToolError> {
        let kind = self
            .tools
            .iter()
            .find(|t| t.name() == call.name)
            .ok_or_else(|| ToolError::Unknown(call.name.clone()))?;

        let args = call.arguments_object().map_err(|e| ToolError::InvalidArguments {
            tool: call.name.clone(),
            reason: format!("{:#}", e),
        })?;

        match kind {
            ToolKind::Exit => Ok(ToolInvocation::Exit {
                output: required_string(&call.name, &args, "output")?,
            }),
            ToolKind::Handoff { name, .. } => Ok(ToolInvocation::Handoff {
                signal: name.clone(),
                output: required_string(&call.name, &args, "output")?,
            }),
            ToolKind::ExecuteCode => Ok(ToolInvocation::ExecuteCode(Script {
                code: required_string(&call.name, &args, "code")?,
                packages: package_list(&call.name, &args)?,
            })),
        }
    }
}

fn required_string(tool: &str, args: &Map<String, Value>, field: &str) -> Result<String, ToolError> {
    match args.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("'{}' must be a string, got {}", field, other),
        }),
        None => Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing required field '{}'", field),
        }),
    }
}

fn package_list(tool: &str, args: &Map<String, Value>) -> Result<Vec<String>, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    let items = match args.get("packages") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(invalid(format!("'packages' must be an array, got {}", other))),
    };

    let mut packages = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str().map(str::trim) {
            // pip flags would let the model rewrite the install command
            Some(name) if !name.is_empty() && !name.starts_with('-') => packages.push(name.to_string()),
            _ => return Err(invalid(format!("invalid package name {}", item))),
        }
    }
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coder_tools() -> Toolbox {
        Toolbox::with_exit([ToolKind::ExecuteCode])
    }

    #[test]
    fn test_exit_is_always_first() {
        let tools = Toolbox::with_exit([ToolKind::programmer(), ToolKind::Exit]);
        let names: Vec<&str> = tools.tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["exit", "programmer"]);
    }

    #[test]
    fn test_definitions_match_tool_shapes() {
        let defs = Toolbox::with_exit([ToolKind::programmer(), ToolKind::ExecuteCode]).definitions();
        assert_eq!(defs.len(), 3);

        let exit = &defs[0].function;
        assert_eq!(exit.name, "exit");
        assert_eq!(exit.parameters["required"], json!(["output"]));
        assert_eq!(exit.parameters["additionalProperties"], json!(false));

        let handoff = &defs[1].function;
        assert_eq!(handoff.parameters["properties"]["output"]["type"], "string");

        let code = &defs[2].function;
        assert_eq!(code.name, "execute_code");
        assert_eq!(code.parameters["required"], json!(["code"]));
        assert_eq!(code.parameters["properties"]["packages"]["items"]["type"], "string");
    }

    #[test]
    fn test_summary_lists_names_and_descriptions() {
        let summary = coder_tools().summary();
        assert!(summary.starts_with("exit: "));
        assert!(summary.contains("\nexecute_code: Execute a python script"));
    }

    #[test]
    fn test_parse_exit() {
        let call = FunctionCall::new("exit", json!({"output": "done"}));
        assert_eq!(
            coder_tools().parse(&call).unwrap(),
            ToolInvocation::Exit {
                output: "done".to_string()
            }
        );
    }

    #[test]
    fn test_parse_handoff_uses_tool_name_as_signal() {
        let tools = Toolbox::with_exit([ToolKind::programmer()]);
        let call = FunctionCall::new("programmer", json!("{\"output\":\"sum 1..10\"}"));
        assert_eq!(
            tools.parse(&call).unwrap(),
            ToolInvocation::Handoff {
                signal: "programmer".to_string(),
                output: "sum 1..10".to_string()
            }
        );
    }

    #[test]
    fn test_parse_execute_code_with_packages() {
        let call = FunctionCall::new(
            "execute_code",
            json!({"code": "import numpy", "packages": ["numpy", " pandas "]}),
        );
        match coder_tools().parse(&call).unwrap() {
            ToolInvocation::ExecuteCode(script) => {
                assert_eq!(script.code, "import numpy");
                assert_eq!(script.packages, vec!["numpy", "pandas"]);
            }
            other => panic!("unexpected invocation: {:?}", other),
        }
    }

    #[test]
    fn test_tool_outside_toolbox_is_unknown() {
        let call = FunctionCall::new("programmer", json!({"output": "x"}));
        assert_eq!(
            coder_tools().parse(&call).unwrap_err(),
            ToolError::Unknown("programmer".to_string())
        );
    }

    #[test]
    fn test_missing_or_mistyped_arguments() {
        let tools = coder_tools();

        let missing = FunctionCall::new("exit", json!({}));
        assert!(matches!(tools.parse(&missing), Err(ToolError::InvalidArguments { .. })));

        let mistyped = FunctionCall::new("execute_code", json!({"code": 7}));
        assert!(matches!(tools.parse(&mistyped), Err(ToolError::InvalidArguments { .. })));

        let garbage = FunctionCall::new("exit", json!("not json"));
        assert!(matches!(tools.parse(&garbage), Err(ToolError::InvalidArguments { .. })));
    }

    #[test]
    fn test_pip_flags_are_rejected_as_packages() {
        let call = FunctionCall::new(
            "execute_code",
            json!({"code": "print(1)", "packages": ["--index-url=http://evil"]}),
        );
        assert!(matches!(coder_tools().parse(&call), Err(ToolError::InvalidArguments { .. })));
    }
}

//! Agent roles, configuration, and turn results

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::{ToolError, ToolKind, Toolbox};

use super::prompts;

/// The agent roles the orchestrator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum AgentRole {
    /// Gathers requirements from the human
    Converser,
    /// Writes and runs code
    Coder,
}

impl AgentRole {
    pub const ALL: [AgentRole; 2] = [AgentRole::Converser, AgentRole::Coder];

    /// Name stored in the `agent_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converser => "Converser",
            Self::Coder => "Coder",
        }
    }

    pub fn base_prompt(&self) -> &'static str {
        match self {
            Self::Converser => prompts::CONVERSER_PROMPT,
            Self::Coder => prompts::CODER_PROMPT,
        }
    }

    pub fn toolbox(&self) -> Toolbox {
        match self {
            Self::Converser => Toolbox::with_exit([ToolKind::programmer()]),
            Self::Coder => Toolbox::with_exit([ToolKind::ExecuteCode]),
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "converser" => Ok(Self::Converser),
            "coder" => Ok(Self::Coder),
            _ => anyhow::bail!("Unknown agent role: {}", s),
        }
    }
}

/// Configuration for one agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: String,
    pub temperature: f32,
    /// LLM calls allowed per turn
    pub max_iterations: usize,
    /// Show a spinner while waiting
    pub show_progress: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            temperature: 0.0,
            max_iterations: 1024,
            show_progress: false,
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A terminal or hand-off tool was called
    Signal { signal: String, payload: String },
    /// The LLM call budget ran out before any terminal tool call
    BudgetExceeded { iterations: usize },
}

impl TurnOutcome {
    pub fn signal(signal: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Signal {
            signal: signal.into(),
            payload: payload.into(),
        }
    }
}

/// Failures that end a turn
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{agent} made an invalid tool call: {error}")]
    Tool { agent: AgentRole, error: ToolError },
    #[error("{0} needs a code executor")]
    MissingExecutor(AgentRole),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session {session_id} belongs to {found}, not {expected}")]
    SessionRoleMismatch {
        session_id: String,
        expected: AgentRole,
        found: String,
    },
    #[error("LLM request failed: {0:#}")]
    Transport(anyhow::Error),
    #[error("history storage failed: {0:#}")]
    Storage(anyhow::Error),
    #[error("console failed: {0:#}")]
    Console(anyhow::Error),
}

impl AgentError {
    /// Contract or wiring mistakes, as opposed to runtime failures
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Tool { .. }
                | Self::MissingExecutor(_)
                | Self::SessionNotFound(_)
                | Self::SessionRoleMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new("qwen2.5-coder")
            .with_temperature(0.2)
            .with_max_iterations(5)
            .with_progress(true);

        assert_eq!(config.model, "qwen2.5-coder");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.max_iterations, 5);
        assert!(config.show_progress);
        assert_eq!(AgentConfig::default().max_iterations, 1024);
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in AgentRole::ALL {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert!("reviewer".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_role_toolboxes() {
        let names = |role: AgentRole| -> Vec<String> {
            role.toolbox().tools().iter().map(|t| t.name().to_string()).collect()
        };
        assert_eq!(names(AgentRole::Converser), vec!["exit", "programmer"]);
        assert_eq!(names(AgentRole::Coder), vec!["exit", "execute_code"]);
    }

    #[test]
    fn test_error_classification() {
        let tool = AgentError::Tool {
            agent: AgentRole::Coder,
            error: ToolError::Unknown("browse".to_string()),
        };
        assert!(tool.is_configuration());
        assert!(tool.to_string().contains("unknown tool 'browse'"));

        let transport = AgentError::Transport(anyhow::anyhow!("connection refused"));
        assert!(!transport.is_configuration());
    }
}

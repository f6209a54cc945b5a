//! User configuration for relay
//!
//! Configuration file: ~/.config/relay/config.toml (or platform equivalent).
//! Every section is optional; missing keys fall back to defaults.

use anyhow::{Context, Result};
use llm_core::LlmConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::AgentConfig;
use crate::tools::sandbox::SandboxConfig;

/// User configuration for the relay CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// LLM endpoint and sampling
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agent: AgentSection,

    /// Code execution
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Agent loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// LLM calls allowed per agent turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

/// Where history and lessons live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file (default: platform data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

fn default_max_iterations() -> usize {
    1024
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl UserConfig {
    /// Load from `path`, or the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("relay").join("config.toml"))
    }

    /// Agent settings derived from the `[llm]` and `[agent]` sections
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::new(&self.llm.model)
            .with_temperature(self.llm.temperature)
            .with_max_iterations(self.agent.max_iterations)
    }

    /// Database path, falling back to the platform data dir
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => crate::storage::default_db_path(),
        }
    }

    /// Create a commented default configuration file
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

const DEFAULT_CONFIG: &str = r#"# relay configuration
# Location: ~/.config/relay/config.toml

[llm]
# Ollama endpoint
host = "127.0.0.1"
port = 11434

# Model used by every agent (overridden by --model / RELAY_MODEL)
model = "llama3.2"
temperature = 0.0

# Per-request timeout in seconds
timeout_secs = 120

[llm.retry]
# Retries for connection failures, timeouts, 5xx and 429 responses
max_retries = 3
initial_delay_ms = 500
max_delay_ms = 8000

[agent]
# Model calls allowed per agent turn
max_iterations = 1024

[sandbox]
# "venv": isolated virtual environment per coder, removed on exit
# "direct": system interpreter in a fresh scratch directory per run
strategy = "venv"
python = "python3"

# Packages installed into the venv up front
packages = []

# Per-execution timeout in seconds
timeout_secs = 60

# Timeout for venv creation and each pip install
install_timeout_secs = 300

[storage]
# History and lessons database (default: platform data dir)
# db_path = "/path/to/conversation_history.db"
"#;

//! Conversational agents
//!
//! Each agent owns a persisted session and loops over LLM calls until the
//! model calls a terminal or hand-off tool.

mod agent_loop;
mod fallback;
mod prompts;
mod state;

pub use agent_loop::{Agent, TurnRunner};
pub use prompts::LESSON_EXTRACTION_PROMPT;
pub use state::{AgentConfig, AgentError, AgentRole, TurnOutcome};

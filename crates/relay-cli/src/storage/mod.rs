//! Persistence layer
//!
//! SQLite-backed storage for:
//! - Conversation history, one row per message, keyed by session id
//! - Lessons learned, keyed by agent type

mod database;
mod history;
mod lessons;

pub use database::{Database, SharedDatabase};
pub use history::HistoryStore;
pub use lessons::LessonStore;

use anyhow::Result;
use std::path::PathBuf;

/// Default database location
pub fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;

    Ok(data_dir.join("relay").join("conversation_history.db"))
}

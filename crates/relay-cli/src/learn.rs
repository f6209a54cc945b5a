//! Lesson extraction from stored conversations

use anyhow::{Context, Result};
use llm_core::{ChatBackend, ChatMessage, ChatOptions};
use std::sync::Arc;
use tracing::info;

use crate::agent::{AgentRole, LESSON_EXTRACTION_PROMPT};
use crate::storage::{HistoryStore, LessonStore, SharedDatabase};

/// Distils every stored message of a role into one new lesson
pub struct LessonExtractor {
    backend: Arc<dyn ChatBackend>,
    model: String,
    history: HistoryStore,
    lessons: LessonStore,
}

impl LessonExtractor {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>, db: SharedDatabase) -> Self {
        Self {
            backend,
            model: model.into(),
            history: HistoryStore::new(Arc::clone(&db)),
            lessons: LessonStore::new(db),
        }
    }

    /// Extract and store a lesson for `role`; `None` when there is no history
    pub async fn extract(&self, role: AgentRole) -> Result<Option<String>> {
        let contents = self.history.contents_for_agent(role.as_str())?;
        if contents.is_empty() {
            info!(agent = %role, "No history to learn from");
            return Ok(None);
        }

        let prompt = format!("{}{}", LESSON_EXTRACTION_PROMPT, contents.join("\n"));
        let response = self
            .backend
            .chat(&self.model, &[ChatMessage::system(prompt)], None, &ChatOptions::default())
            .await
            .with_context(|| format!("Lesson extraction for {} failed", role))?;

        let lesson = response.message.content.trim().to_string();
        if lesson.is_empty() {
            info!(agent = %role, "Model returned no lesson");
            return Ok(None);
        }

        self.lessons.append(role.as_str(), &lesson)?;
        info!(agent = %role, messages = contents.len(), "Stored lesson");
        Ok(Some(lesson))
    }
}

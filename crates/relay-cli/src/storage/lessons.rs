//! Append-only lesson store

use anyhow::{Context, Result};
use rusqlite::params;

use super::database::SharedDatabase;

#[derive(Debug, Clone)]
pub struct LessonStore {
    db: SharedDatabase,
}

impl LessonStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn append(&self, agent_type: &str, lesson: &str) -> Result<()> {
        self.db
            .conn()
            .execute(
                "INSERT INTO lessons_learned (agent_type, lesson) VALUES (?1, ?2)",
                params![agent_type, lesson],
            )
            .with_context(|| format!("Failed to store lesson for {}", agent_type))?;
        Ok(())
    }

    /// Lessons for an agent type, oldest first
    pub fn for_agent(&self, agent_type: &str) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT lesson FROM lessons_learned WHERE agent_type = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([agent_type], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_lessons_are_scoped_and_ordered() {
        let store = LessonStore::new(Database::open_in_memory().unwrap().shared());
        store.append("Coder", "Print the final answer.").unwrap();
        store.append("Converser", "Ask one question at a time.").unwrap();
        store.append("Coder", "Use integer arithmetic for money.").unwrap();

        assert_eq!(
            store.for_agent("Coder").unwrap(),
            vec!["Print the final answer.", "Use integer arithmetic for money."]
        );
        assert_eq!(store.for_agent("Converser").unwrap().len(), 1);
        assert!(store.for_agent("Reviewer").unwrap().is_empty());
    }
}

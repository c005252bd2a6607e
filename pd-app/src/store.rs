//! SQLite persistence for the records Pindrop owns: user preferences,
//! learned profiles, feedback, and the decision audit log. Collaborator
//! reads (messages, conversations) stay behind their own seams.

use async_trait::async_trait;
use pd_core::{
    CoreError, DecisionLog, DecisionRecord, Feedback, FeedbackLog, FeedbackRecord, LearnedProfile,
    MessageId, PreferencesStore, ProfileStore, Result, UserId, UserPreferences,
};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS pd_preferences (
    user_id TEXT PRIMARY KEY,
    prefs_json TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS pd_profiles (
    user_id TEXT PRIMARY KEY,
    profile_json TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS pd_feedback (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    submitted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pd_feedback_user ON pd_feedback(user_id);
CREATE TABLE IF NOT EXISTS pd_decisions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pd_decisions_user ON pd_decisions(user_id, created_at);
"#,
        )
        .map_err(storage)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CoreError::Storage(format!("connection lock poisoned: {e}")))
    }
}

fn storage(e: impl std::fmt::Display) -> CoreError {
    CoreError::Storage(e.to_string())
}

#[async_trait]
impl PreferencesStore for SqliteStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<UserPreferences>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT prefs_json FROM pd_preferences WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        json.map(|j| serde_json::from_str(&j).map_err(storage))
            .transpose()
    }

    async fn put(&self, user_id: &UserId, preferences: &UserPreferences) -> Result<()> {
        let json = serde_json::to_string(preferences).map_err(storage)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO pd_preferences (user_id, prefs_json, updated_at)
VALUES (?1, ?2, CURRENT_TIMESTAMP)
ON CONFLICT(user_id) DO UPDATE
SET prefs_json = excluded.prefs_json,
    updated_at = CURRENT_TIMESTAMP
"#,
            params![user_id.as_str(), json],
        )
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<LearnedProfile>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT profile_json FROM pd_profiles WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        json.map(|j| serde_json::from_str(&j).map_err(storage))
            .transpose()
    }

    async fn put(&self, user_id: &UserId, profile: &LearnedProfile) -> Result<()> {
        let json = serde_json::to_string(profile).map_err(storage)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO pd_profiles (user_id, profile_json, updated_at)
VALUES (?1, ?2, CURRENT_TIMESTAMP)
ON CONFLICT(user_id) DO UPDATE
SET profile_json = excluded.profile_json,
    updated_at = CURRENT_TIMESTAMP
"#,
            params![user_id.as_str(), json],
        )
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackLog for SqliteStore {
    async fn append(&self, record: &FeedbackRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(storage)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO pd_feedback (id, user_id, record_json, submitted_at)
VALUES (?1, ?2, ?3, ?4)
"#,
            params![
                record.id.to_string(),
                record.user_id.as_str(),
                json,
                record.submitted_at.to_rfc3339(),
            ],
        )
        .map_err(storage)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FeedbackRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_json FROM pd_feedback WHERE user_id = ?1 ORDER BY submitted_at",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![user_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(storage)?;
        let mut out = Vec::new();
        for row in rows {
            let json = row.map_err(storage)?;
            out.push(serde_json::from_str(&json).map_err(storage)?);
        }
        Ok(out)
    }

    async fn users_with_feedback(&self) -> Result<Vec<UserId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM pd_feedback ORDER BY user_id")
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(UserId::from(row.map_err(storage)?));
        }
        Ok(out)
    }
}

#[async_trait]
impl DecisionLog for SqliteStore {
    async fn append(&self, record: &DecisionRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(storage)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO pd_decisions (id, user_id, record_json, created_at)
VALUES (?1, ?2, ?3, ?4)
"#,
            params![
                record.id.to_string(),
                record.user_id.as_str(),
                json,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(storage)?;
        Ok(())
    }

    async fn attach_feedback(
        &self,
        user_id: &UserId,
        message_id: &MessageId,
        feedback: Feedback,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
SELECT id, record_json
  FROM pd_decisions
 WHERE user_id = ?1
 ORDER BY created_at DESC
"#,
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![user_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage)?;
        drop(stmt);

        for (id, json) in rows {
            let mut record: DecisionRecord = serde_json::from_str(&json).map_err(storage)?;
            if record.decision.message_ids.contains(message_id) {
                record.feedback = Some(feedback);
                let updated = serde_json::to_string(&record).map_err(storage)?;
                conn.execute(
                    "UPDATE pd_decisions SET record_json = ?1 WHERE id = ?2",
                    params![updated, id],
                )
                .map_err(storage)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<DecisionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
SELECT record_json
  FROM pd_decisions
 WHERE user_id = ?1
 ORDER BY created_at DESC
 LIMIT ?2
"#,
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![user_id.as_str(), limit as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(storage)?;
        let mut out = Vec::new();
        for row in rows {
            let json = row.map_err(storage)?;
            out.push(serde_json::from_str(&json).map_err(storage)?);
        }
        Ok(out)
    }
}

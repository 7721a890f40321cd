//! Channel repository.
//!
//! Joined channels and their per-channel autoreply settings.

use super::DbError;
use sqlx::SqlitePool;

/// Valid range for `autoreply frequency`.
pub const FREQUENCY_RANGE: std::ops::RangeInclusive<i64> = 1..=5;
/// Valid range for `autoreply safety`.
pub const SAFETY_RANGE: std::ops::RangeInclusive<i64> = 0..=3;

/// A joined channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub channel_name: String,
    pub created_at: i64,
}

/// Autoreply settings for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub autoreply_enabled: bool,
    pub autoreply_frequency: i64,
    pub reply_safety: i64,
    pub llm_token: Option<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            autoreply_enabled: false,
            autoreply_frequency: 1,
            reply_safety: 0,
            llm_token: None,
        }
    }
}

/// Repository for channel operations.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    /// Create a new channel repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a channel. Re-registering refreshes the stored name.
    pub async fn register(&self, channel_id: &str, channel_name: &str) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO channels (channel_id, channel_name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET channel_name = excluded.channel_name
            "#,
        )
        .bind(channel_id)
        .bind(channel_name.to_lowercase())
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove a channel and everything scoped to it.
    pub async fn unregister(&self, channel_id: &str) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM channels WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM commands WHERE scope = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM approvals WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM counters WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// All registered channels, oldest first.
    pub async fn list(&self) -> Result<Vec<ChannelRecord>, DbError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT channel_id, channel_name, created_at FROM channels ORDER BY created_at, channel_name",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(channel_id, channel_name, created_at)| ChannelRecord {
                channel_id,
                channel_name,
                created_at,
            })
            .collect())
    }

    /// Find a channel by its login name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<ChannelRecord>, DbError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT channel_id, channel_name, created_at FROM channels WHERE channel_name = ? COLLATE NOCASE",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(channel_id, channel_name, created_at)| ChannelRecord {
            channel_id,
            channel_name,
            created_at,
        }))
    }

    pub async fn find_by_id(&self, channel_id: &str) -> Result<Option<ChannelRecord>, DbError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT channel_id, channel_name, created_at FROM channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(channel_id, channel_name, created_at)| ChannelRecord {
            channel_id,
            channel_name,
            created_at,
        }))
    }

    /// Settings for a channel. Unknown channels get defaults (autoreply off).
    pub async fn settings(&self, channel_id: &str) -> Result<ChannelSettings, DbError> {
        let row = sqlx::query_as::<_, (bool, i64, i64, Option<String>)>(
            r#"
            SELECT autoreply_enabled, autoreply_frequency, reply_safety, llm_token
            FROM channels
            WHERE channel_id = ?
            "#,
        )
        .bind(channel_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row
            .map(
                |(autoreply_enabled, autoreply_frequency, reply_safety, llm_token)| {
                    ChannelSettings {
                        autoreply_enabled,
                        autoreply_frequency,
                        reply_safety,
                        llm_token,
                    }
                },
            )
            .unwrap_or_default())
    }

    pub async fn set_autoreply(&self, channel_id: &str, enabled: bool) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE channels SET autoreply_enabled = ? WHERE channel_id = ?")
            .bind(enabled)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_frequency(&self, channel_id: &str, frequency: i64) -> Result<bool, DbError> {
        if !FREQUENCY_RANGE.contains(&frequency) {
            return Err(DbError::OutOfRange(format!(
                "frequency must be {}-{}",
                FREQUENCY_RANGE.start(),
                FREQUENCY_RANGE.end()
            )));
        }
        let result =
            sqlx::query("UPDATE channels SET autoreply_frequency = ? WHERE channel_id = ?")
                .bind(frequency)
                .bind(channel_id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_safety(&self, channel_id: &str, safety: i64) -> Result<bool, DbError> {
        if !SAFETY_RANGE.contains(&safety) {
            return Err(DbError::OutOfRange(format!(
                "safety must be {}-{}",
                SAFETY_RANGE.start(),
                SAFETY_RANGE.end()
            )));
        }
        let result = sqlx::query("UPDATE channels SET reply_safety = ? WHERE channel_id = ?")
            .bind(safety)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_llm_token(&self, channel_id: &str, token: &str) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE channels SET llm_token = ? WHERE channel_id = ?")
            .bind(token)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn test_register_and_list() {
        let db = Database::new(":memory:").await.unwrap();
        db.channels().register("1", "Alice").await.unwrap();
        db.channels().register("2", "bob").await.unwrap();
        // Re-registering is not an error.
        db.channels().register("1", "alice").await.unwrap();

        let names: Vec<_> = db
            .channels()
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.channel_name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"alice".to_string()));

        let found = db.channels().find_by_name("ALICE").await.unwrap().unwrap();
        assert_eq!(found.channel_id, "1");
        let found = db.channels().find_by_id("2").await.unwrap().unwrap();
        assert_eq!(found.channel_name, "bob");
        assert!(db.channels().find_by_id("3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings_default_for_unknown_channel() {
        let db = Database::new(":memory:").await.unwrap();
        let settings = db.channels().settings("404").await.unwrap();
        assert!(!settings.autoreply_enabled);
        assert_eq!(settings.autoreply_frequency, 1);
        assert!(settings.llm_token.is_none());
    }

    #[tokio::test]
    async fn test_settings_are_range_checked() {
        let db = Database::new(":memory:").await.unwrap();
        db.channels().register("1", "alice").await.unwrap();

        assert!(db.channels().set_frequency("1", 3).await.unwrap());
        assert!(db.channels().set_frequency("1", 6).await.is_err());
        assert!(db.channels().set_safety("1", 2).await.unwrap());
        assert!(db.channels().set_safety("1", -1).await.is_err());
        db.channels().set_autoreply("1", true).await.unwrap();
        db.channels().set_llm_token("1", "sk-test").await.unwrap();

        let settings = db.channels().settings("1").await.unwrap();
        assert!(settings.autoreply_enabled);
        assert_eq!(settings.autoreply_frequency, 3);
        assert_eq!(settings.reply_safety, 2);
        assert_eq!(settings.llm_token.as_deref(), Some("sk-test"));
    }

    #[tokio::test]
    async fn test_unregister_drops_scoped_rows() {
        let db = Database::new(":memory:").await.unwrap();
        db.channels().register("1", "alice").await.unwrap();
        db.commands()
            .upsert(&crate::db::Scope::channel("1"), "hi", "hello")
            .await
            .unwrap();
        db.approvals().approve("1", "42", true).await.unwrap();

        assert!(db.channels().unregister("1").await.unwrap());
        assert!(db.channels().list().await.unwrap().is_empty());
        assert!(
            db.commands()
                .list(&crate::db::Scope::channel("1"))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(!db.approvals().is_approved("1", "42").await.unwrap());
        assert!(!db.channels().unregister("1").await.unwrap());
    }
}

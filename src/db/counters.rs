//! Counter repository for template `counter` / `increment` functions.

use super::DbError;
use sqlx::SqlitePool;

/// Repository for named per-channel counters.
pub struct CounterRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CounterRepository<'a> {
    /// Create a new counter repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Current value; missing counters read as zero.
    pub async fn get(&self, channel_id: &str, name: &str) -> Result<i64, DbError> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM counters WHERE channel_id = ? AND name = ?")
                .bind(channel_id)
                .bind(name)
                .fetch_optional(self.pool)
                .await?;
        Ok(value.unwrap_or(0))
    }

    /// Add `delta` to a counter, creating it at zero first. Returns the new value.
    pub async fn add(&self, channel_id: &str, name: &str, delta: i64) -> Result<i64, DbError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (channel_id, name, value)
            VALUES (?, ?, ?)
            ON CONFLICT(channel_id, name) DO UPDATE SET value = counters.value + excluded.value
            RETURNING value
            "#,
        )
        .bind(channel_id)
        .bind(name)
        .bind(delta)
        .fetch_one(self.pool)
        .await?;
        Ok(value)
    }
}

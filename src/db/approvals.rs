//! Approval ledger repository.
//!
//! An approval marks a chat participant as vetted for a channel. Approval is a
//! set keyed by (channel, user): approving twice keeps the first record.

use super::DbError;
use sqlx::SqlitePool;

/// One approved user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub user_id: String,
    pub manual: bool,
    pub created_at: i64,
}

/// Repository for the approval ledger.
pub struct ApprovalRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ApprovalRepository<'a> {
    /// Create a new approval repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an approval. Returns false if the user was already approved.
    pub async fn approve(&self, channel_id: &str, user_id: &str, manual: bool) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO approvals (channel_id, user_id, manual, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(channel_id, user_id) DO NOTHING
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .bind(manual)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove an approval. Returns whether one existed.
    pub async fn unapprove(&self, channel_id: &str, user_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM approvals WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_approved(&self, channel_id: &str, user_id: &str) -> Result<bool, DbError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM approvals WHERE channel_id = ? AND user_id = ?",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Whether an existing approval was made by a human.
    pub async fn is_manual(&self, channel_id: &str, user_id: &str) -> Result<Option<bool>, DbError> {
        let manual: Option<bool> = sqlx::query_scalar(
            "SELECT manual FROM approvals WHERE channel_id = ? AND user_id = ?",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(manual)
    }

    /// Approvals in a channel, oldest first.
    pub async fn list(&self, channel_id: &str) -> Result<Vec<ApprovalRecord>, DbError> {
        let rows = sqlx::query_as::<_, (String, bool, i64)>(
            "SELECT user_id, manual, created_at FROM approvals WHERE channel_id = ? ORDER BY created_at, user_id",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, manual, created_at)| ApprovalRecord {
                user_id,
                manual,
                created_at,
            })
            .collect())
    }

    /// Number of approvals in a channel.
    pub async fn count(&self, channel_id: &str) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approvals WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn test_approval_is_a_set() {
        let db = Database::new(":memory:").await.unwrap();
        let approvals = db.approvals();

        assert!(approvals.approve("1", "42", false).await.unwrap());
        // Second approval is ignored and keeps the original flag.
        assert!(!approvals.approve("1", "42", true).await.unwrap());
        assert_eq!(approvals.is_manual("1", "42").await.unwrap(), Some(false));
        assert_eq!(approvals.count("1").await.unwrap(), 1);

        assert!(approvals.is_approved("1", "42").await.unwrap());
        assert!(!approvals.is_approved("2", "42").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_per_channel() {
        let db = Database::new(":memory:").await.unwrap();
        db.approvals().approve("1", "42", true).await.unwrap();
        db.approvals().approve("1", "43", false).await.unwrap();
        db.approvals().approve("2", "44", false).await.unwrap();

        let listed = db.approvals().list("1").await.unwrap();
        let users: Vec<_> = listed.iter().map(|a| (a.user_id.as_str(), a.manual)).collect();
        assert_eq!(users, vec![("42", true), ("43", false)]);
        assert!(db.approvals().list("3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unapprove() {
        let db = Database::new(":memory:").await.unwrap();
        db.approvals().approve("1", "42", true).await.unwrap();
        assert!(db.approvals().unapprove("1", "42").await.unwrap());
        assert!(!db.approvals().unapprove("1", "42").await.unwrap());
        assert_eq!(db.approvals().is_manual("1", "42").await.unwrap(), None);
    }
}

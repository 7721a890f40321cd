//! Command repository.
//!
//! Stores dynamic commands keyed by (scope, name). The name is matched as a
//! regular expression by the resolver; `revision` bumps on every update so
//! compiled patterns can be cached per version.

use super::DbError;
use sqlx::SqlitePool;
use std::fmt;

const GLOBAL_SCOPE: &str = "global";

/// Visibility of a command record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Channel(String),
}

impl Scope {
    pub fn channel(id: impl Into<String>) -> Self {
        Self::Channel(id.into())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    fn as_key(&self) -> &str {
        match self {
            Self::Global => GLOBAL_SCOPE,
            Self::Channel(id) => id,
        }
    }

    fn from_key(key: String) -> Self {
        if key == GLOBAL_SCOPE {
            Self::Global
        } else {
            Self::Channel(key)
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// A stored dynamic command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub scope: Scope,
    pub name: String,
    pub template: String,
    pub revision: i64,
}

type CommandRow = (String, String, String, i64);

fn from_row((scope, name, template, revision): CommandRow) -> CommandRecord {
    CommandRecord {
        scope: Scope::from_key(scope),
        name,
        template,
        revision,
    }
}

/// Repository for command records.
pub struct CommandRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CommandRepository<'a> {
    /// Create a new command repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a command. Returns the new revision.
    pub async fn upsert(&self, scope: &Scope, name: &str, template: &str) -> Result<i64, DbError> {
        let now = chrono::Utc::now().timestamp();
        let revision: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO commands (scope, name, template, revision, updated_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(scope, name) DO UPDATE SET
                template = excluded.template,
                revision = commands.revision + 1,
                updated_at = excluded.updated_at
            RETURNING revision
            "#,
        )
        .bind(scope.as_key())
        .bind(name)
        .bind(template)
        .bind(now)
        .fetch_one(self.pool)
        .await?;
        Ok(revision)
    }

    /// Delete a command. Returns whether it existed.
    pub async fn delete(&self, scope: &Scope, name: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM commands WHERE scope = ? AND name = ?")
            .bind(scope.as_key())
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single command by exact name.
    pub async fn get(&self, scope: &Scope, name: &str) -> Result<Option<CommandRecord>, DbError> {
        let row = sqlx::query_as::<_, CommandRow>(
            "SELECT scope, name, template, revision FROM commands WHERE scope = ? AND name = ?",
        )
        .bind(scope.as_key())
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    /// All commands in one scope, sorted by name.
    pub async fn list(&self, scope: &Scope) -> Result<Vec<CommandRecord>, DbError> {
        let rows = sqlx::query_as::<_, CommandRow>(
            "SELECT scope, name, template, revision FROM commands WHERE scope = ? ORDER BY name",
        )
        .bind(scope.as_key())
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Commands visible from a channel: its own records followed by global ones.
    pub async fn visible_to(&self, channel_id: &str) -> Result<Vec<CommandRecord>, DbError> {
        let rows = sqlx::query_as::<_, CommandRow>(
            r#"
            SELECT scope, name, template, revision FROM commands
            WHERE scope = ? OR scope = ?
            ORDER BY scope = ?, name
            "#,
        )
        .bind(channel_id)
        .bind(GLOBAL_SCOPE)
        .bind(GLOBAL_SCOPE)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }
}

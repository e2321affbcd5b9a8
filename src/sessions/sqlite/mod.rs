use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use super::{Session, SessionStore};
use crate::memory::ConversationMemory;
use crate::{ChatError, Result};

#[cfg(test)]
mod tests;

pub type DbPool = Pool<Sqlite>;

type SessionRow = (String, String, DateTime<Utc>, DateTime<Utc>);

/// Session store backed by a SQLite file, so sessions survive restarts
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to create session database connection pool")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Open `sessions.db` inside `config_dir`, creating the directory if needed
    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("sessions.db")).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running session store migrations");

        sqlx::migrate!("src/sessions/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run session schema migration")?;

        debug!("Session store migrations completed successfully");
        Ok(())
    }
}

fn session_error(action: &str, err: &sqlx::Error) -> ChatError {
    ChatError::Session(format!("Failed to {}: {}", action, err))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, memory, created_at, last_active FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| session_error("load session", &e))?;

        let Some((id, memory, created_at, last_active)) = row else {
            return Ok(None);
        };

        let memory: ConversationMemory = serde_json::from_str(&memory)?;
        Ok(Some(Session {
            id,
            memory,
            created_at,
            last_active,
        }))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let memory = serde_json::to_string(&session.memory)?;

        sqlx::query(
            r"INSERT INTO sessions (id, memory, created_at, last_active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                memory = excluded.memory,
                last_active = excluded.last_active",
        )
        .bind(&session.id)
        .bind(memory)
        .bind(session.created_at)
        .bind(session.last_active)
        .execute(&self.pool)
        .await
        .map_err(|e| session_error("save session", &e))?;

        debug!("Saved session {}", session.id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| session_error("delete session", &e))?;
        Ok(())
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM sessions WHERE last_active < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| session_error("purge idle sessions", &e))?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

//! Settings repository
//!
//! Store-wide key/value settings: tax rate, shipping rates, contact details,
//! review moderation and the like.

use crate::db::DynDatabasePool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Setting>>;

    async fn get_all(&self) -> Result<Vec<Setting>>;

    /// Values for the given keys; absent keys are simply missing from the map
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Upsert several keys atomically
    async fn set_many(&self, settings: &HashMap<String, String>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;
}

pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Setting>> {
        let row = sqlx::query("SELECT key, value, updated_at FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get setting")?;
        Ok(row.as_ref().map(row_to_setting))
    }

    async fn get_all(&self) -> Result<Vec<Setting>> {
        let rows = sqlx::query("SELECT key, value, updated_at FROM settings ORDER BY key")
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to list settings")?;
        Ok(rows.iter().map(row_to_setting).collect())
    }

    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT key, value FROM settings WHERE key IN (");
        let mut separated = qb.separated(", ");
        for key in keys {
            separated.push_bind(key.to_string());
        }
        separated.push_unseparated(")");

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to get settings")?;
        Ok(rows
            .iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.sqlite().acquire().await?;
        upsert(&mut conn, key, value).await
    }

    async fn set_many(&self, settings: &HashMap<String, String>) -> Result<()> {
        let mut tx = self.pool.sqlite().begin().await?;
        for (key, value) in settings {
            upsert(&mut tx, key, value).await?;
        }
        tx.commit().await.context("Failed to save settings")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete setting")?;
        Ok(result.rows_affected() > 0)
    }
}

async fn upsert(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to save setting {}", key))?;
    Ok(())
}

fn row_to_setting(row: &SqliteRow) -> Setting {
    Setting {
        key: row.get("key"),
        value: row.get("value"),
        updated_at: row.get("updated_at"),
    }
}

//! Cart repository

use crate::db::DynDatabasePool;
use crate::models::CartItem;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};
use std::sync::Arc;

#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Items of a user's cart, oldest first
    async fn list(&self, user_id: i64) -> Result<Vec<CartItem>>;

    async fn get(&self, user_id: i64, product_id: i64) -> Result<Option<CartItem>>;

    /// Set the quantity of a line, inserting it when absent
    async fn upsert(&self, user_id: i64, product_id: i64, quantity: i64) -> Result<CartItem>;

    async fn remove(&self, user_id: i64, product_id: i64) -> Result<bool>;

    async fn clear(&self, user_id: i64) -> Result<u64>;
}

pub struct SqlxCartRepository {
    pool: DynDatabasePool,
}

impl SqlxCartRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CartRepository> {
        Arc::new(Self::new(pool))
    }
}

const CART_COLUMNS: &str = "id, user_id, product_id, quantity, created_at, updated_at";

#[async_trait]
impl CartRepository for SqlxCartRepository {
    async fn list(&self, user_id: i64) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cart_items WHERE user_id = ? ORDER BY created_at, id",
            CART_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list cart items")?;
        Ok(rows.iter().map(row_to_item).collect())
    }

    async fn get(&self, user_id: i64, product_id: i64) -> Result<Option<CartItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cart_items WHERE user_id = ? AND product_id = ?",
            CART_COLUMNS
        ))
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get cart item")?;
        Ok(row.as_ref().map(row_to_item))
    }

    async fn upsert(&self, user_id: i64, product_id: i64, quantity: i64) -> Result<CartItem> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, product_id, quantity) VALUES (?, ?, ?)
            ON CONFLICT(user_id, product_id)
            DO UPDATE SET quantity = excluded.quantity, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to save cart item")?;

        self.get(user_id, product_id)
            .await?
            .context("Cart item not found after upsert")
    }

    async fn remove(&self, user_id: i64, product_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ? AND product_id = ?")
            .bind(user_id)
            .bind(product_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to remove cart item")?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to clear cart")?;
        Ok(result.rows_affected())
    }
}

fn row_to_item(row: &SqliteRow) -> CartItem {
    CartItem {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

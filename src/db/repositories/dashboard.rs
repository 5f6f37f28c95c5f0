//! Dashboard repository
//!
//! Read-only aggregate queries for the admin dashboard. Revenue only counts
//! orders whose payment went through.

use crate::db::DynDatabasePool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub total_revenue: f64,
    pub total_orders: i64,
    pub paid_orders: i64,
    pub customers: i64,
    pub products: i64,
    pub pending_reviews: i64,
    pub unread_messages: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySales {
    /// `YYYY-MM-DD`
    pub date: String,
    pub revenue: f64,
    pub orders: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub product_id: Option<i64>,
    pub product_name: String,
    pub units_sold: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LowStockProduct {
    pub id: i64,
    pub name: String,
    pub sku: String,
    pub stock_quantity: i64,
}

#[async_trait]
pub trait DashboardRepository: Send + Sync {
    async fn counts(&self) -> Result<StoreCounts>;

    async fn orders_by_status(&self) -> Result<Vec<StatusCount>>;

    /// Active products with stock strictly below `threshold`, lowest first
    async fn low_stock(&self, threshold: i64, limit: i64) -> Result<Vec<LowStockProduct>>;

    /// Paid revenue per day since `since`; days without sales are absent
    async fn daily_sales(&self, since: DateTime<Utc>) -> Result<Vec<DailySales>>;

    async fn top_products(&self, limit: i64) -> Result<Vec<TopProduct>>;
}

pub struct SqlxDashboardRepository {
    pool: DynDatabasePool,
}

impl SqlxDashboardRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn DashboardRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl DashboardRepository for SqlxDashboardRepository {
    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(SUM(total), 0.0) FROM orders WHERE payment_status = 'paid') AS total_revenue,
                (SELECT COUNT(*) FROM orders) AS total_orders,
                (SELECT COUNT(*) FROM orders WHERE payment_status = 'paid') AS paid_orders,
                (SELECT COUNT(*) FROM users WHERE role = 'customer') AS customers,
                (SELECT COUNT(*) FROM products) AS products,
                (SELECT COUNT(*) FROM reviews WHERE status = 'pending') AS pending_reviews,
                (SELECT COUNT(*) FROM contact_messages WHERE status = 'new') AS unread_messages
            "#,
        )
        .fetch_one(self.pool.sqlite())
        .await
        .context("Failed to load dashboard counts")?;

        Ok(StoreCounts {
            total_revenue: row.get("total_revenue"),
            total_orders: row.get("total_orders"),
            paid_orders: row.get("paid_orders"),
            customers: row.get("customers"),
            products: row.get("products"),
            pending_reviews: row.get("pending_reviews"),
            unread_messages: row.get("unread_messages"),
        })
    }

    async fn orders_by_status(&self) -> Result<Vec<StatusCount>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM orders GROUP BY status ORDER BY status",
        )
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to count orders by status")?;

        Ok(rows
            .iter()
            .map(|r| StatusCount {
                status: r.get("status"),
                count: r.get("count"),
            })
            .collect())
    }

    async fn low_stock(&self, threshold: i64, limit: i64) -> Result<Vec<LowStockProduct>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, sku, stock_quantity FROM products
            WHERE status = 'active' AND stock_quantity < ?
            ORDER BY stock_quantity, id
            LIMIT ?
            "#,
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to load low stock products")?;

        Ok(rows
            .iter()
            .map(|r| LowStockProduct {
                id: r.get("id"),
                name: r.get("name"),
                sku: r.get("sku"),
                stock_quantity: r.get("stock_quantity"),
            })
            .collect())
    }

    async fn daily_sales(&self, since: DateTime<Utc>) -> Result<Vec<DailySales>> {
        // datetime() normalises both CURRENT_TIMESTAMP and RFC 3339 values
        let rows = sqlx::query(
            r#"
            SELECT date(created_at) AS day, COALESCE(SUM(total), 0.0) AS revenue, COUNT(*) AS orders
            FROM orders
            WHERE payment_status = 'paid' AND datetime(created_at) >= datetime(?)
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(since.format("%Y-%m-%d %H:%M:%S").to_string())
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to load daily sales")?;

        Ok(rows
            .iter()
            .map(|r| DailySales {
                date: r.get("day"),
                revenue: r.get("revenue"),
                orders: r.get("orders"),
            })
            .collect())
    }

    async fn top_products(&self, limit: i64) -> Result<Vec<TopProduct>> {
        let rows = sqlx::query(
            r#"
            SELECT oi.product_id, oi.product_name,
                   SUM(oi.quantity) AS units_sold, SUM(oi.total_price) AS revenue
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.payment_status = 'paid'
            GROUP BY oi.product_id, oi.product_name
            ORDER BY units_sold DESC, revenue DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to load top products")?;

        Ok(rows
            .iter()
            .map(|r| TopProduct {
                product_id: r.get("product_id"),
                product_name: r.get("product_name"),
                units_sold: r.get("units_sold"),
                revenue: r.get("revenue"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    async fn setup() -> SqlxDashboardRepository {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        for sql in [
            "INSERT INTO users (id, email, password_hash) VALUES (1, 'c@example.com', 'x')",
            "INSERT INTO products (id, name, slug, sku, stock_quantity) VALUES (1, 'Alpine', 'alpine', 'A1', 3)",
            "INSERT INTO products (id, name, slug, sku, stock_quantity) VALUES (2, 'Coast', 'coast', 'C1', 40)",
            "INSERT INTO orders (id, order_number, user_id, email, status, payment_status, total) VALUES (1, 'TS-1', 1, 'c@example.com', 'processing', 'paid', 120.5)",
            "INSERT INTO orders (id, order_number, user_id, email, status, payment_status, total) VALUES (2, 'TS-2', 1, 'c@example.com', 'pending', 'pending', 99)",
            "INSERT INTO order_items (order_id, product_id, product_name, sku, quantity, unit_price, total_price) VALUES (1, 1, 'Alpine', 'A1', 4, 25, 100)",
            "INSERT INTO order_items (order_id, product_id, product_name, sku, quantity, unit_price, total_price) VALUES (1, 2, 'Coast', 'C1', 1, 20.5, 20.5)",
            "INSERT INTO order_items (order_id, product_id, product_name, sku, quantity, unit_price, total_price) VALUES (2, 2, 'Coast', 'C1', 9, 11, 99)",
            "INSERT INTO contact_messages (name, email, subject, message) VALUES ('a', 'a@b.c', 's', 'm')",
        ] {
            pool.execute(sql).await.unwrap();
        }
        SqlxDashboardRepository::new(pool)
    }

    #[tokio::test]
    async fn test_counts_only_paid_revenue() {
        let repo = setup().await;
        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.total_revenue, 120.5);
        assert_eq!(counts.total_orders, 2);
        assert_eq!(counts.paid_orders, 1);
        assert_eq!(counts.customers, 1);
        assert_eq!(counts.products, 2);
        assert_eq!(counts.unread_messages, 1);

        let by_status = repo.orders_by_status().await.unwrap();
        assert_eq!(by_status.len(), 2);
    }

    #[tokio::test]
    async fn test_daily_sales_and_top_products() {
        let repo = setup().await;
        let sales = repo.daily_sales(Utc::now() - Duration::days(1)).await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].orders, 1);

        let top = repo.top_products(5).await.unwrap();
        assert_eq!(top[0].product_name, "Alpine");
        assert_eq!(top[0].units_sold, 4);
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn test_low_stock_threshold() {
        let repo = setup().await;
        let low = repo.low_stock(10, 10).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].sku, "A1");
    }
}

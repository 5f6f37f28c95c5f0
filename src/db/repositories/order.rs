//! Order repository
//!
//! Orders, their items, and the processed-webhook-event ledger used to make
//! payment notifications idempotent.

use crate::db::DynDatabasePool;
use crate::models::{
    ListParams, NewOrder, Order, OrderItem, OrderStatus, OrderWithItems, PaymentStatus,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;

/// Outcome of applying a payment-succeeded notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentApplied {
    /// Order moved to paid; stock and cart updated
    Applied,
    /// The event was processed before
    Duplicate,
    /// Money arrived for a cancelled order. Recorded as paid, but stock,
    /// cart and status are left alone so it can be refunded.
    PaidAfterCancel,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert an order and its items atomically
    async fn create(&self, order: &NewOrder) -> Result<OrderWithItems>;

    async fn get(&self, id: i64) -> Result<Option<OrderWithItems>>;

    async fn get_by_payment_intent(&self, intent_id: &str) -> Result<Option<OrderWithItems>>;

    async fn list_for_user(&self, user_id: i64, params: &ListParams) -> Result<(Vec<Order>, i64)>;

    async fn list_all(
        &self,
        status: Option<OrderStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Order>, i64)>;

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<bool>;

    /// Cancel a pending, unpaid order. Returns false when it is no longer one.
    async fn cancel_unpaid(&self, id: i64) -> Result<bool>;

    async fn update_payment_status(&self, id: i64, status: PaymentStatus) -> Result<bool>;

    /// True when the user has a paid order containing the product
    async fn has_purchased(&self, user_id: i64, product_id: i64) -> Result<bool>;

    async fn event_seen(&self, event_id: &str) -> Result<bool>;

    /// Record a processed event. Returns false when it was already recorded.
    async fn record_event(&self, event_id: &str, event_type: &str) -> Result<bool>;

    /// Mark the order paid and processing, decrement stock for every item and
    /// clear the buyer's cart, all in one transaction together with the event
    /// record.
    async fn apply_payment(
        &self,
        order_id: i64,
        event_id: &str,
        event_type: &str,
    ) -> Result<PaymentApplied>;
}

pub struct SqlxOrderRepository {
    pool: DynDatabasePool,
}

impl SqlxOrderRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn OrderRepository> {
        Arc::new(Self::new(pool))
    }
}

const ORDER_COLUMNS: &str = r#"
    id, order_number, user_id, email, status, payment_status, payment_intent_id,
    subtotal, tax, shipping, total, shipping_address, notes, created_at, updated_at
"#;

#[async_trait]
impl OrderRepository for SqlxOrderRepository {
    async fn create(&self, order: &NewOrder) -> Result<OrderWithItems> {
        let pool = self.pool.sqlite();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_number, user_id, email, status, payment_status, payment_intent_id,
                subtotal, tax, shipping, total, shipping_address, notes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(&order.email)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_intent_id)
        .bind(order.totals.subtotal)
        .bind(order.totals.tax)
        .bind(order.totals.shipping)
        .bind(order.totals.total)
        .bind(serde_json::to_string(&order.shipping_address)?)
        .bind(&order.notes)
        .execute(&mut *tx)
        .await
        .context("Failed to create order")?;
        let order_id = result.last_insert_rowid();

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, product_name, sku, quantity, unit_price, total_price)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(order_id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(&item.sku)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total_price)
            .execute(&mut *tx)
            .await
            .context("Failed to create order item")?;
        }

        tx.commit().await?;

        load_order(pool, "id = ?", OrderKey::Id(order_id))
            .await?
            .context("Order not found after insert")
    }

    async fn get(&self, id: i64) -> Result<Option<OrderWithItems>> {
        load_order(self.pool.sqlite(), "id = ?", OrderKey::Id(id)).await
    }

    async fn get_by_payment_intent(&self, intent_id: &str) -> Result<Option<OrderWithItems>> {
        load_order(
            self.pool.sqlite(),
            "payment_intent_id = ?",
            OrderKey::Text(intent_id.to_string()),
        )
        .await
    }

    async fn list_for_user(&self, user_id: i64, params: &ListParams) -> Result<(Vec<Order>, i64)> {
        let pool = self.pool.sqlite();
        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM orders WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("Failed to count orders")?
            .get("count");

        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list orders")?;

        let orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        Ok((orders, total))
    }

    async fn list_all(
        &self,
        status: Option<OrderStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Order>, i64)> {
        let pool = self.pool.sqlite();

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM orders WHERE 1 = 1");
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM orders WHERE 1 = 1", ORDER_COLUMNS));
        if let Some(status) = status {
            count_qb.push(" AND status = ").push_bind(status.as_str());
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());

        let total: i64 = count_qb
            .build()
            .fetch_one(pool)
            .await
            .context("Failed to count orders")?
            .get("count");
        let rows = qb
            .build()
            .fetch_all(pool)
            .await
            .context("Failed to list orders")?;

        let orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        Ok((orders, total))
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<bool> {
        let result =
            sqlx::query("UPDATE orders SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(self.pool.sqlite())
                .await
                .context("Failed to update order status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_unpaid(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = 'pending' AND payment_status <> 'paid'
            "#,
        )
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to cancel order")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_payment_status(&self, id: i64, status: PaymentStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET payment_status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to update payment status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_purchased(&self, user_id: i64, product_id: i64) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM orders o
                JOIN order_items oi ON oi.order_id = o.id
                WHERE o.user_id = ? AND oi.product_id = ? AND o.payment_status = 'paid'
            ) AS purchased
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_one(self.pool.sqlite())
        .await
        .context("Failed to check purchase history")?;
        Ok(row.get::<i64, _>("purchased") != 0)
    }

    async fn event_seen(&self, event_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM stripe_events WHERE id = ?) AS seen")
            .bind(event_id)
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to check webhook event")?;
        Ok(row.get::<i64, _>("seen") != 0)
    }

    async fn record_event(&self, event_id: &str, event_type: &str) -> Result<bool> {
        let mut conn = self.pool.sqlite().acquire().await?;
        insert_event(&mut conn, event_id, event_type).await
    }

    async fn apply_payment(
        &self,
        order_id: i64,
        event_id: &str,
        event_type: &str,
    ) -> Result<PaymentApplied> {
        let mut tx = self.pool.sqlite().begin().await?;

        if !insert_event(&mut tx, event_id, event_type).await? {
            return Ok(PaymentApplied::Duplicate);
        }

        let row = sqlx::query("SELECT user_id, status, payment_status FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .with_context(|| format!("Order {} not found", order_id))?;
        let user_id: Option<i64> = row.get("user_id");
        let already_paid = row.get::<String, _>("payment_status") == PaymentStatus::Paid.as_str();

        if row.get::<String, _>("status") == OrderStatus::Cancelled.as_str() {
            sqlx::query(
                "UPDATE orders SET payment_status = 'paid', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .context("Failed to record payment on cancelled order")?;
            tx.commit().await?;
            return Ok(PaymentApplied::PaidAfterCancel);
        }

        if !already_paid {
            sqlx::query(
                r#"
                UPDATE orders SET payment_status = 'paid', status = 'processing',
                       updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .context("Failed to mark order paid")?;

            sqlx::query(
                r#"
                UPDATE products
                SET stock_quantity = MAX(stock_quantity - (
                        SELECT COALESCE(SUM(oi.quantity), 0) FROM order_items oi
                        WHERE oi.order_id = ? AND oi.product_id = products.id
                    ), 0),
                    updated_at = CURRENT_TIMESTAMP
                WHERE id IN (SELECT product_id FROM order_items WHERE order_id = ? AND product_id IS NOT NULL)
                "#,
            )
            .bind(order_id)
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .context("Failed to decrement stock")?;

            if let Some(user_id) = user_id {
                sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to clear cart")?;
            }
        }

        tx.commit().await?;
        Ok(PaymentApplied::Applied)
    }
}

enum OrderKey {
    Id(i64),
    Text(String),
}

async fn insert_event(conn: &mut SqliteConnection, event_id: &str, event_type: &str) -> Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO stripe_events (id, event_type) VALUES (?, ?)")
        .bind(event_id)
        .bind(event_type)
        .execute(&mut *conn)
        .await
        .context("Failed to record webhook event")?;
    Ok(result.rows_affected() > 0)
}

async fn load_order(pool: &SqlitePool, predicate: &str, key: OrderKey) -> Result<Option<OrderWithItems>> {
    let sql = format!("SELECT {} FROM orders WHERE {}", ORDER_COLUMNS, predicate);
    let query = match key {
        OrderKey::Id(id) => sqlx::query(&sql).bind(id),
        OrderKey::Text(text) => sqlx::query(&sql).bind(text),
    };
    let row = query
        .fetch_optional(pool)
        .await
        .context("Failed to get order")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let order = row_to_order(&row)?;

    let item_rows = sqlx::query(
        r#"
        SELECT id, order_id, product_id, product_name, sku, quantity, unit_price, total_price
        FROM order_items WHERE order_id = ? ORDER BY id
        "#,
    )
    .bind(order.id)
    .fetch_all(pool)
    .await
    .context("Failed to load order items")?;

    let items = item_rows
        .iter()
        .map(|r| OrderItem {
            id: r.get("id"),
            order_id: r.get("order_id"),
            product_id: r.get("product_id"),
            product_name: r.get("product_name"),
            sku: r.get("sku"),
            quantity: r.get("quantity"),
            unit_price: r.get("unit_price"),
            total_price: r.get("total_price"),
        })
        .collect();

    Ok(Some(OrderWithItems { order, items }))
}

fn row_to_order(row: &SqliteRow) -> Result<Order> {
    let status: String = row.get("status");
    let payment_status: String = row.get("payment_status");
    let address: String = row.get("shipping_address");
    Ok(Order {
        id: row.get("id"),
        order_number: row.get("order_number"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        status: status.parse()?,
        payment_status: payment_status.parse()?,
        payment_intent_id: row.get("payment_intent_id"),
        subtotal: row.get("subtotal"),
        tax: row.get("tax"),
        shipping: row.get("shipping"),
        total: row.get("total"),
        shipping_address: serde_json::from_str(&address).unwrap_or_default(),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::models::{NewOrderItem, OrderTotals, ShippingAddress};

    async fn setup() -> (DynDatabasePool, SqlxOrderRepository) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        for sql in [
            "INSERT INTO users (id, email, password_hash) VALUES (1, 'a@b.c', 'x')",
            "INSERT INTO products (id, name, slug, sku, price, stock_quantity) VALUES (1, 'A', 'a', 'S1', 100, 10)",
            "INSERT INTO cart_items (user_id, product_id, quantity) VALUES (1, 1, 4)",
        ] {
            pool.execute(sql).await.unwrap();
        }
        (pool.clone(), SqlxOrderRepository::new(pool))
    }

    fn new_order(intent: &str) -> NewOrder {
        NewOrder {
            order_number: format!("ORD-{}", intent),
            user_id: Some(1),
            email: "a@b.c".into(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: Some(intent.to_string()),
            totals: OrderTotals { subtotal: 400.0, tax: 32.0, shipping: 25.0, total: 457.0 },
            shipping_address: ShippingAddress::default(),
            notes: None,
            items: vec![NewOrderItem {
                product_id: 1,
                product_name: "A".into(),
                sku: "S1".into(),
                quantity: 4,
                unit_price: 100.0,
                total_price: 400.0,
            }],
        }
    }

    async fn stock(pool: &DynDatabasePool) -> i64 {
        sqlx::query("SELECT stock_quantity FROM products WHERE id = 1")
            .fetch_one(pool.sqlite())
            .await
            .unwrap()
            .get("stock_quantity")
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let (_pool, repo) = setup().await;
        let created = repo.create(&new_order("pi_1")).await.unwrap();
        assert_eq!(created.items.len(), 1);

        let by_intent = repo.get_by_payment_intent("pi_1").await.unwrap().unwrap();
        assert_eq!(by_intent.order.id, created.order.id);
        assert_eq!(by_intent.order.total, 457.0);
    }

    #[tokio::test]
    async fn test_apply_payment_is_idempotent() {
        let (pool, repo) = setup().await;
        let order = repo.create(&new_order("pi_1")).await.unwrap();

        let first = repo.apply_payment(order.order.id, "evt_1", "payment_intent.succeeded").await.unwrap();
        assert_eq!(first, PaymentApplied::Applied);
        assert_eq!(stock(&pool).await, 6);

        let second = repo.apply_payment(order.order.id, "evt_1", "payment_intent.succeeded").await.unwrap();
        assert_eq!(second, PaymentApplied::Duplicate);
        assert_eq!(stock(&pool).await, 6);

        let loaded = repo.get(order.order.id).await.unwrap().unwrap();
        assert_eq!(loaded.order.payment_status, PaymentStatus::Paid);
        assert_eq!(loaded.order.status, OrderStatus::Processing);

        let cart: i64 = sqlx::query("SELECT COUNT(*) AS n FROM cart_items")
            .fetch_one(pool.sqlite())
            .await
            .unwrap()
            .get("n");
        assert_eq!(cart, 0);
        assert!(repo.has_purchased(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (_pool, repo) = setup().await;
        let first = repo.create(&new_order("pi_1")).await.unwrap();
        repo.create(&new_order("pi_2")).await.unwrap();
        repo.update_status(first.order.id, OrderStatus::Shipped).await.unwrap();

        let (shipped, total) = repo
            .list_all(Some(OrderStatus::Shipped), &ListParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(shipped[0].id, first.order.id);

        let (mine, total) = repo.list_for_user(1, &ListParams::new(1, 10)).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(mine.len(), 2);
    }

    #[tokio::test]
    async fn test_record_event_once() {
        let (_pool, repo) = setup().await;
        assert!(!repo.event_seen("evt_9").await.unwrap());
        assert!(repo.record_event("evt_9", "charge.refunded").await.unwrap());
        assert!(!repo.record_event("evt_9", "charge.refunded").await.unwrap());
        assert!(repo.event_seen("evt_9").await.unwrap());
    }

    #[tokio::test]
    async fn test_payment_on_cancelled_order_keeps_it_cancelled() {
        let (pool, repo) = setup().await;
        let order = repo.create(&new_order("pi_late")).await.unwrap();
        assert!(repo.cancel_unpaid(order.order.id).await.unwrap());

        let outcome = repo
            .apply_payment(order.order.id, "evt_late", "payment_intent.succeeded")
            .await
            .unwrap();
        assert_eq!(outcome, PaymentApplied::PaidAfterCancel);

        let loaded = repo.get(order.order.id).await.unwrap().unwrap();
        assert_eq!(loaded.order.status, OrderStatus::Cancelled);
        assert_eq!(loaded.order.payment_status, PaymentStatus::Paid);
        assert_eq!(stock(&pool).await, 10);
        let cart: i64 = sqlx::query("SELECT COUNT(*) AS n FROM cart_items")
            .fetch_one(pool.sqlite())
            .await
            .unwrap()
            .get("n");
        assert_eq!(cart, 1);

        let again = repo
            .apply_payment(order.order.id, "evt_late", "payment_intent.succeeded")
            .await
            .unwrap();
        assert_eq!(again, PaymentApplied::Duplicate);
    }

    #[tokio::test]
    async fn test_cancel_unpaid_refuses_paid_order() {
        let (_pool, repo) = setup().await;
        let order = repo.create(&new_order("pi_paid")).await.unwrap();
        repo.apply_payment(order.order.id, "evt_paid", "payment_intent.succeeded")
            .await
            .unwrap();

        assert!(!repo.cancel_unpaid(order.order.id).await.unwrap());
        let loaded = repo.get(order.order.id).await.unwrap().unwrap();
        assert_eq!(loaded.order.status, OrderStatus::Processing);
    }
}

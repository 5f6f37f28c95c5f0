//! Order service
//!
//! Checkout quotes, order creation and the order lifecycle. Prices come
//! from the catalog at quote time and are frozen into the order items.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::OrderRepository;
use crate::models::{
    CartLine, ListParams, NewOrder, NewOrderItem, Order, OrderStatus, OrderTotals, OrderWithItems,
    PagedResult, PaymentStatus, ShippingAddress,
};
use crate::services::cart::CartService;
use crate::services::error::{is_valid_email, round_cents, ServiceError, ServiceResult};
use crate::services::settings::{SettingsService, StoreSettings};

/// Priced snapshot of a cart, ready to become an order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutQuote {
    pub lines: Vec<CartLine>,
    pub totals: OrderTotals,
}

/// Customer-supplied checkout details
#[derive(Debug, Clone, Default)]
pub struct CheckoutDetails {
    pub email: String,
    pub shipping_address: ShippingAddress,
    pub notes: Option<String>,
}

impl CheckoutDetails {
    /// Normalize the email and require a complete shipping address
    pub fn validate(mut self) -> ServiceResult<Self> {
        self.email = self.email.trim().to_lowercase();
        if !is_valid_email(&self.email) {
            return Err(ServiceError::validation("A valid email address is required"));
        }
        let missing = self.shipping_address.missing_fields();
        if !missing.is_empty() {
            return Err(ServiceError::Validation(format!(
                "Shipping address is missing: {}",
                missing.join(", ")
            )));
        }
        self.notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Ok(self)
    }
}

/// Subtotal, tax and shipping under the store's settings, in cents precision.
pub fn compute_totals(subtotal: f64, settings: &StoreSettings) -> OrderTotals {
    let subtotal = round_cents(subtotal);
    let tax = round_cents(subtotal * settings.tax_rate);
    let shipping = if subtotal >= settings.free_shipping_threshold {
        0.0
    } else {
        round_cents(settings.flat_shipping_rate)
    };
    OrderTotals {
        subtotal,
        tax,
        shipping,
        total: round_cents(subtotal + tax + shipping),
    }
}

/// `TS-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "TS-{}-{}",
        Utc::now().format("%Y%m%d"),
        suffix[..8].to_uppercase()
    )
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    cart: Arc<CartService>,
    settings: Arc<SettingsService>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        cart: Arc<CartService>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            orders,
            cart,
            settings,
        }
    }

    /// Price the user's cart. Fails when the cart is empty or any line can
    /// no longer be fulfilled.
    pub async fn quote(&self, user_id: i64) -> ServiceResult<CheckoutQuote> {
        let cart = self.cart.summary(user_id).await?;
        if cart.items.is_empty() {
            return Err(ServiceError::validation("Cart is empty"));
        }
        for line in &cart.items {
            if !line.product.is_purchasable() {
                return Err(ServiceError::Validation(format!(
                    "{} is no longer available",
                    line.product.name
                )));
            }
            if line.quantity > line.product.stock_quantity {
                return Err(ServiceError::Validation(format!(
                    "Insufficient stock for {}: {} requested, {} available",
                    line.product.name,
                    line.quantity,
                    line.product.stock_quantity.max(0)
                )));
            }
        }

        let settings = self.settings.store_settings().await?;
        Ok(CheckoutQuote {
            totals: compute_totals(cart.subtotal, &settings),
            lines: cart.items,
        })
    }

    /// Store a pending, unpaid order for a quote
    pub async fn create_pending(
        &self,
        user_id: i64,
        quote: &CheckoutQuote,
        details: CheckoutDetails,
        payment_intent_id: Option<String>,
    ) -> ServiceResult<OrderWithItems> {
        let details = details.validate()?;
        self.insert(user_id, quote, details, payment_intent_id).await
    }

    /// Build an order for a payment that arrived without a checkout on
    /// record. The address is whatever the payment provider collected.
    pub async fn create_for_payment(
        &self,
        user_id: i64,
        email: &str,
        shipping_address: ShippingAddress,
        payment_intent_id: &str,
    ) -> ServiceResult<OrderWithItems> {
        let quote = self.quote(user_id).await?;
        let details = CheckoutDetails {
            email: email.trim().to_lowercase(),
            shipping_address,
            notes: None,
        };
        self.insert(user_id, &quote, details, Some(payment_intent_id.to_string()))
            .await
    }

    async fn insert(
        &self,
        user_id: i64,
        quote: &CheckoutQuote,
        details: CheckoutDetails,
        payment_intent_id: Option<String>,
    ) -> ServiceResult<OrderWithItems> {
        let order = NewOrder {
            order_number: generate_order_number(),
            user_id: Some(user_id),
            email: details.email,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_intent_id,
            totals: quote.totals,
            shipping_address: details.shipping_address,
            notes: details.notes,
            items: quote
                .lines
                .iter()
                .map(|line| NewOrderItem {
                    product_id: line.product_id,
                    product_name: line.product.name.clone(),
                    sku: line.product.sku.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    total_price: line.line_total,
                })
                .collect(),
        };

        let created = self
            .orders
            .create(&order)
            .await
            .map_err(|e| ServiceError::from_write(e, "Order already exists for this payment"))?;
        tracing::info!(
            order_id = created.order.id,
            order_number = %created.order.order_number,
            total = created.order.total,
            "Order created"
        );
        Ok(created)
    }

    /// Direct repository access for the payment flow
    pub(crate) fn repository(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    pub async fn list_for_user(&self, user_id: i64, params: &ListParams) -> ServiceResult<PagedResult<Order>> {
        let (orders, total) = self.orders.list_for_user(user_id, params).await?;
        Ok(PagedResult::new(orders, total, params))
    }

    pub async fn list_all(
        &self,
        status: Option<&str>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<Order>> {
        let status = parse_status_filter(status)?;
        let (orders, total) = self.orders.list_all(status, params).await?;
        Ok(PagedResult::new(orders, total, params))
    }

    /// Customers only see their own orders; others read as missing.
    pub async fn get(&self, id: i64, user_id: i64, is_admin: bool) -> ServiceResult<OrderWithItems> {
        let order = self
            .orders
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order"))?;
        if !is_admin && order.order.user_id != Some(user_id) {
            return Err(ServiceError::not_found("Order"));
        }
        Ok(order)
    }

    pub async fn cancel(&self, id: i64, user_id: i64) -> ServiceResult<OrderWithItems> {
        let order = self.get(id, user_id, false).await?;
        if order.order.status != OrderStatus::Pending || order.order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::validation(
                "Only pending, unpaid orders can be cancelled",
            ));
        }
        // A payment may have landed since the read
        if !self.orders.cancel_unpaid(id).await? {
            return Err(ServiceError::validation(
                "Only pending, unpaid orders can be cancelled",
            ));
        }
        tracing::info!(order_id = id, user_id, "Order cancelled by customer");
        self.get(id, user_id, false).await
    }

    pub async fn update_status(&self, id: i64, status: &str) -> ServiceResult<OrderWithItems> {
        let status = status.parse::<OrderStatus>().map_err(|_| {
            ServiceError::Validation(format!(
                "Invalid status '{}'. Allowed: {}",
                status,
                OrderStatus::ALL
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        if !self.orders.update_status(id, status).await? {
            return Err(ServiceError::not_found("Order"));
        }
        tracing::info!(order_id = id, %status, "Order status updated");
        self.get(id, 0, true).await
    }
}

fn parse_status_filter(status: Option<&str>) -> ServiceResult<Option<OrderStatus>> {
    match status.map(str::trim).filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all")) {
        None => Ok(None),
        Some(s) => s
            .parse::<OrderStatus>()
            .map(Some)
            .map_err(|_| ServiceError::Validation(format!("Unknown order status '{}'", s))),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{details, shop};
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_totals_below_free_shipping() {
        let totals = compute_totals(100.0, &StoreSettings::default());
        assert_eq!(totals.subtotal, 100.0);
        assert_eq!(totals.tax, 8.0);
        assert_eq!(totals.shipping, 25.0);
        assert_eq!(totals.total, 133.0);
    }

    #[test]
    fn test_totals_free_shipping_at_threshold() {
        let totals = compute_totals(500.0, &StoreSettings::default());
        assert_eq!(totals.shipping, 0.0);
        assert_eq!(totals.total, 540.0);
    }

    #[test]
    fn test_order_number_shape() {
        let number = generate_order_number();
        assert!(number.starts_with("TS-"));
        assert_eq!(number.len(), "TS-20240101-ABCDEF12".len());
        assert_ne!(number, generate_order_number());
    }

    proptest! {
        #[test]
        fn prop_totals_add_up(cents in 0i64..10_000_000) {
            let totals = compute_totals(cents as f64 / 100.0, &StoreSettings::default());
            let sum = round_cents(totals.subtotal + totals.tax + totals.shipping);
            prop_assert!((totals.total - sum).abs() < 1e-9);
            prop_assert!(totals.tax >= 0.0);
            prop_assert!(totals.shipping == 0.0 || totals.shipping == 25.0);
        }
    }

    #[tokio::test]
    async fn test_quote_rejects_empty_cart_and_overstock() {
        let shop = shop().await;
        assert!(matches!(shop.orders.quote(1).await, Err(ServiceError::Validation(_))));

        shop.cart.add(1, 2, 3).await.unwrap();
        sqlx::query("UPDATE products SET stock_quantity = 1 WHERE id = 2")
            .execute(shop.pool.sqlite())
            .await
            .unwrap();
        assert!(matches!(shop.orders.quote(1).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_pending_order_freezes_quote() {
        let shop = shop().await;
        shop.cart.add(1, 1, 2).await.unwrap();
        let quote = shop.orders.quote(1).await.unwrap();
        assert_eq!(quote.totals.subtotal, 200.0);
        assert_eq!(quote.totals.total, 241.0);

        let order = shop
            .orders
            .create_pending(1, &quote, details(), Some("pi_123".into()))
            .await
            .unwrap();
        assert_eq!(order.order.status, OrderStatus::Pending);
        assert_eq!(order.order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].total_price, 200.0);
        assert_eq!(order.order.total, 241.0);
    }

    #[tokio::test]
    async fn test_create_pending_validates_address() {
        let shop = shop().await;
        shop.cart.add(1, 1, 1).await.unwrap();
        let quote = shop.orders.quote(1).await.unwrap();
        let mut bad = details();
        bad.shipping_address.city.clear();
        assert!(matches!(
            shop.orders.create_pending(1, &quote, bad, None).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_visibility_and_cancel() {
        let shop = shop().await;
        shop.cart.add(1, 1, 1).await.unwrap();
        let quote = shop.orders.quote(1).await.unwrap();
        let order = shop.orders.create_pending(1, &quote, details(), None).await.unwrap();
        let id = order.order.id;

        assert!(matches!(shop.orders.get(id, 2, false).await, Err(ServiceError::NotFound(_))));
        assert!(shop.orders.get(id, 2, true).await.is_ok());
        assert!(matches!(shop.orders.cancel(id, 2).await, Err(ServiceError::NotFound(_))));

        let cancelled = shop.orders.cancel(id, 1).await.unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert!(matches!(shop.orders.cancel(id, 1).await, Err(ServiceError::Validation(_))));

        assert_eq!(shop.orders.list_for_user(1, &ListParams::default()).await.unwrap().total, 1);
        assert_eq!(shop.orders.list_for_user(2, &ListParams::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_admin_status_update() {
        let shop = shop().await;
        shop.cart.add(1, 1, 1).await.unwrap();
        let quote = shop.orders.quote(1).await.unwrap();
        let order = shop.orders.create_pending(1, &quote, details(), None).await.unwrap();

        let shipped = shop.orders.update_status(order.order.id, "shipped").await.unwrap();
        assert_eq!(shipped.order.status, OrderStatus::Shipped);
        assert!(matches!(
            shop.orders.update_status(order.order.id, "lost").await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            shop.orders.update_status(9999, "shipped").await,
            Err(ServiceError::NotFound(_))
        ));

        let shipped_only = shop
            .orders
            .list_all(Some("shipped"), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(shipped_only.total, 1);
        assert!(shop.orders.list_all(Some("nope"), &ListParams::default()).await.is_err());
    }
}

//! Cart service

use std::sync::Arc;

use crate::db::repositories::{CartRepository, ProductRepository};
use crate::models::{CartLine, CartSummary, Product};
use crate::services::error::{round_cents, ServiceError, ServiceResult};

const MAX_LINE_QUANTITY: i64 = 100;

pub struct CartService {
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartRepository>, products: Arc<dyn ProductRepository>) -> Self {
        Self { carts, products }
    }

    /// Cart lines joined with their products. Lines whose product has been
    /// deleted are dropped from the cart.
    pub async fn summary(&self, user_id: i64) -> ServiceResult<CartSummary> {
        let items = self.carts.list(user_id).await?;
        let ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
        let products = self.products.get_many(&ids).await?;
        let mut images = self.products.images_for(&ids).await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let Some(product) = products.iter().find(|p| p.id == item.product_id) else {
                self.carts.remove(user_id, item.product_id).await?;
                continue;
            };
            let image_url = images.remove(&product.id).and_then(|imgs| {
                imgs.iter()
                    .find(|i| i.is_primary)
                    .or_else(|| imgs.first())
                    .map(|i| i.url.clone())
            });
            let unit_price = product.effective_price();
            lines.push(CartLine {
                product_id: product.id,
                quantity: item.quantity,
                product: product.clone(),
                image_url,
                unit_price,
                line_total: round_cents(unit_price * item.quantity as f64),
            });
        }

        Ok(CartSummary {
            item_count: lines.iter().map(|l| l.quantity).sum(),
            subtotal: round_cents(lines.iter().map(|l| l.line_total).sum()),
            items: lines,
        })
    }

    /// Add to the cart, merging with an existing line
    pub async fn add(&self, user_id: i64, product_id: i64, quantity: i64) -> ServiceResult<CartSummary> {
        if quantity < 1 {
            return Err(ServiceError::validation("Quantity must be at least 1"));
        }
        let product = self.purchasable(product_id).await?;
        let existing = self
            .carts
            .get(user_id, product_id)
            .await?
            .map(|i| i.quantity)
            .unwrap_or(0);

        let quantity = existing + quantity;
        check_stock(&product, quantity)?;
        self.carts.upsert(user_id, product_id, quantity).await?;
        self.summary(user_id).await
    }

    /// Set a line's quantity; zero removes it
    pub async fn set_quantity(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> ServiceResult<CartSummary> {
        if quantity < 0 {
            return Err(ServiceError::validation("Quantity cannot be negative"));
        }
        if quantity == 0 {
            return self.remove(user_id, product_id).await;
        }
        if self.carts.get(user_id, product_id).await?.is_none() {
            return Err(ServiceError::not_found("Cart item"));
        }

        let product = self.purchasable(product_id).await?;
        check_stock(&product, quantity)?;
        self.carts.upsert(user_id, product_id, quantity).await?;
        self.summary(user_id).await
    }

    pub async fn remove(&self, user_id: i64, product_id: i64) -> ServiceResult<CartSummary> {
        if !self.carts.remove(user_id, product_id).await? {
            return Err(ServiceError::not_found("Cart item"));
        }
        self.summary(user_id).await
    }

    pub async fn clear(&self, user_id: i64) -> ServiceResult<()> {
        let removed = self.carts.clear(user_id).await?;
        tracing::debug!(user_id, removed, "Cart cleared");
        Ok(())
    }

    async fn purchasable(&self, product_id: i64) -> ServiceResult<Product> {
        let product = self
            .products
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product"))?;
        if !product.is_purchasable() {
            return Err(ServiceError::validation("Product is not available for purchase"));
        }
        Ok(product)
    }
}

fn check_stock(product: &Product, quantity: i64) -> ServiceResult<()> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::Validation(format!(
            "At most {} of one product per order",
            MAX_LINE_QUANTITY
        )));
    }
    if quantity > product.stock_quantity {
        return Err(ServiceError::Validation(format!(
            "Only {} of {} in stock",
            product.stock_quantity.max(0),
            product.name
        )));
    }
    Ok(())
}

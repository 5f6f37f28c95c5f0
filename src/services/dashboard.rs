//! Admin dashboard
//!
//! Store-wide figures. Revenue and sales only count paid orders.

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::repositories::{
    DailySales, DashboardRepository, LowStockProduct, OrderRepository, StatusCount, StoreCounts,
    TopProduct,
};
use crate::models::{ListParams, Order};
use crate::services::error::ServiceResult;
use crate::services::settings::SettingsService;

const DEFAULT_SALES_DAYS: i64 = 30;
const MAX_SALES_DAYS: i64 = 365;
const LOW_STOCK_LIMIT: i64 = 20;
const RECENT_ORDERS: u32 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(flatten)]
    pub counts: StoreCounts,
    pub orders_by_status: Vec<StatusCount>,
    pub low_stock_threshold: i64,
    pub low_stock: Vec<LowStockProduct>,
    pub recent_orders: Vec<Order>,
}

pub struct DashboardService {
    repo: Arc<dyn DashboardRepository>,
    orders: Arc<dyn OrderRepository>,
    settings: Arc<SettingsService>,
}

impl DashboardService {
    pub fn new(
        repo: Arc<dyn DashboardRepository>,
        orders: Arc<dyn OrderRepository>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            repo,
            orders,
            settings,
        }
    }

    pub async fn stats(&self) -> ServiceResult<DashboardStats> {
        let threshold = self.settings.store_settings().await?.low_stock_threshold;
        let counts = self.repo.counts().await?;
        let orders_by_status = self.repo.orders_by_status().await?;
        let low_stock = self.repo.low_stock(threshold, LOW_STOCK_LIMIT).await?;
        let (recent_orders, _) = self
            .orders
            .list_all(None, &ListParams::new(1, RECENT_ORDERS))
            .await?;

        Ok(DashboardStats {
            counts,
            orders_by_status,
            low_stock_threshold: threshold,
            low_stock,
            recent_orders,
        })
    }

    /// One entry per day for the last `days` days (today included), zero
    /// filled. Defaults to 30, capped at 365.
    pub async fn sales(&self, days: Option<i64>) -> ServiceResult<Vec<DailySales>> {
        let days = days.unwrap_or(DEFAULT_SALES_DAYS).clamp(1, MAX_SALES_DAYS);
        let today = Utc::now().date_naive();
        let first = today - Duration::days(days - 1);
        let since = first.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();

        let rows = self.repo.daily_sales(since).await?;
        Ok(fill_days(rows, first, days))
    }

    pub async fn top_products(&self, limit: Option<i64>) -> ServiceResult<Vec<TopProduct>> {
        let limit = limit.unwrap_or(10).clamp(1, 50);
        Ok(self.repo.top_products(limit).await?)
    }
}

/// Expand sparse per-day rows into `days` consecutive entries from `first`
fn fill_days(rows: Vec<DailySales>, first: NaiveDate, days: i64) -> Vec<DailySales> {
    let by_date: HashMap<String, DailySales> =
        rows.into_iter().map(|r| (r.date.clone(), r)).collect();

    (0..days)
        .map(|offset| {
            let date = (first + Duration::days(offset)).format("%Y-%m-%d").to_string();
            by_date.get(&date).cloned().unwrap_or(DailySales {
                date,
                revenue: 0.0,
                orders: 0,
            })
        })
        .collect()
}

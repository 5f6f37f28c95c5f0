//! Settings service
//!
//! Typed view over the key/value settings table. Checkout totals, review
//! moderation and the dashboard read their knobs from here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{Setting, SettingsRepository};
use crate::services::error::{ServiceError, ServiceResult};

/// Known setting keys
pub mod keys {
    pub const STORE_NAME: &str = "store_name";
    pub const CONTACT_EMAIL: &str = "contact_email";
    pub const CONTACT_PHONE: &str = "contact_phone";
    pub const CURRENCY: &str = "currency";
    pub const TAX_RATE: &str = "tax_rate";
    pub const FREE_SHIPPING_THRESHOLD: &str = "free_shipping_threshold";
    pub const FLAT_SHIPPING_RATE: &str = "flat_shipping_rate";
    pub const LOW_STOCK_THRESHOLD: &str = "low_stock_threshold";
    pub const AUTO_APPROVE_REVIEWS: &str = "auto_approve_reviews";
}

const CACHE_KEY: &str = "settings:store";
const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    pub store_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub currency: String,
    pub tax_rate: f64,
    pub free_shipping_threshold: f64,
    pub flat_shipping_rate: f64,
    pub low_stock_threshold: i64,
    pub auto_approve_reviews: bool,
}

/// The subset served to storefront clients
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicSettings {
    pub store_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub currency: String,
    pub tax_rate: f64,
    pub free_shipping_threshold: f64,
    pub flat_shipping_rate: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            store_name: "Tire Store".to_string(),
            contact_email: String::new(),
            contact_phone: String::new(),
            currency: "USD".to_string(),
            tax_rate: 0.08,
            free_shipping_threshold: 500.0,
            flat_shipping_rate: 25.0,
            low_stock_threshold: 10,
            auto_approve_reviews: false,
        }
    }
}

impl StoreSettings {
    pub fn public(&self) -> PublicSettings {
        PublicSettings {
            store_name: self.store_name.clone(),
            contact_email: self.contact_email.clone(),
            contact_phone: self.contact_phone.clone(),
            currency: self.currency.clone(),
            tax_rate: self.tax_rate,
            free_shipping_threshold: self.free_shipping_threshold,
            flat_shipping_rate: self.flat_shipping_rate,
        }
    }

    fn from_map(map: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| map.get(key).cloned().unwrap_or(default);
        let number = |key: &str, default: f64| {
            map.get(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(default)
        };

        Self {
            store_name: text(keys::STORE_NAME, defaults.store_name),
            contact_email: text(keys::CONTACT_EMAIL, defaults.contact_email),
            contact_phone: text(keys::CONTACT_PHONE, defaults.contact_phone),
            currency: text(keys::CURRENCY, defaults.currency),
            tax_rate: number(keys::TAX_RATE, defaults.tax_rate),
            free_shipping_threshold: number(
                keys::FREE_SHIPPING_THRESHOLD,
                defaults.free_shipping_threshold,
            ),
            flat_shipping_rate: number(keys::FLAT_SHIPPING_RATE, defaults.flat_shipping_rate),
            low_stock_threshold: map
                .get(keys::LOW_STOCK_THRESHOLD)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.low_stock_threshold),
            auto_approve_reviews: map
                .get(keys::AUTO_APPROVE_REVIEWS)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.auto_approve_reviews),
        }
    }
}

/// Reject values that would break totals or moderation
fn validate(key: &str, value: &str) -> Result<(), String> {
    let value = value.trim();
    match key {
        keys::TAX_RATE => match value.parse::<f64>() {
            Ok(v) if (0.0..=1.0).contains(&v) => Ok(()),
            _ => Err("tax_rate must be a number between 0 and 1".to_string()),
        },
        keys::FREE_SHIPPING_THRESHOLD | keys::FLAT_SHIPPING_RATE => match value.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(()),
            _ => Err(format!("{} must be a non-negative number", key)),
        },
        keys::LOW_STOCK_THRESHOLD => match value.parse::<i64>() {
            Ok(v) if v >= 0 => Ok(()),
            _ => Err("low_stock_threshold must be a non-negative integer".to_string()),
        },
        keys::AUTO_APPROVE_REVIEWS => match value {
            "true" | "false" => Ok(()),
            _ => Err("auto_approve_reviews must be true or false".to_string()),
        },
        _ if key.trim().is_empty() || key.len() > 100 => {
            Err("Setting keys must be 1 to 100 characters".to_string())
        }
        _ => Ok(()),
    }
}

pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    cache: Arc<Cache>,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>, cache: Arc<Cache>) -> Self {
        Self { repo, cache }
    }

    pub async fn store_settings(&self) -> ServiceResult<StoreSettings> {
        if let Ok(Some(cached)) = self.cache.get::<StoreSettings>(CACHE_KEY).await {
            return Ok(cached);
        }

        let map: HashMap<String, String> = self
            .repo
            .get_all()
            .await?
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect();
        let settings = StoreSettings::from_map(&map);

        if let Err(e) = self.cache.set(CACHE_KEY, &settings, CACHE_TTL).await {
            tracing::warn!("Failed to cache store settings: {:#}", e);
        }
        Ok(settings)
    }

    pub async fn all(&self) -> ServiceResult<Vec<Setting>> {
        Ok(self.repo.get_all().await?)
    }

    pub async fn update(&self, values: HashMap<String, String>) -> ServiceResult<Vec<Setting>> {
        if values.is_empty() {
            return Err(ServiceError::validation("No settings provided"));
        }
        for (key, value) in &values {
            validate(key, value).map_err(ServiceError::Validation)?;
        }

        let values: HashMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        self.repo.set_many(&values).await?;
        self.cache.delete(CACHE_KEY).await?;

        tracing::info!(count = values.len(), "Store settings updated");
        self.all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::SqlxSettingsRepository;
    use crate::db::{create_test_pool, migrations};

    async fn service() -> SettingsService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        SettingsService::new(
            SqlxSettingsRepository::boxed(pool),
            Arc::new(Cache::Memory(MemoryCache::new())),
        )
    }

    #[tokio::test]
    async fn test_seeded_store_settings() {
        let svc = service().await;
        let settings = svc.store_settings().await.unwrap();
        assert_eq!(settings.tax_rate, 0.08);
        assert_eq!(settings.free_shipping_threshold, 500.0);
        assert_eq!(settings.flat_shipping_rate, 25.0);
        assert!(!settings.auto_approve_reviews);
    }

    #[tokio::test]
    async fn test_update_invalidates_cache() {
        let svc = service().await;
        svc.store_settings().await.unwrap();

        let mut values = HashMap::new();
        values.insert("tax_rate".to_string(), "0.2".to_string());
        values.insert("auto_approve_reviews".to_string(), "true".to_string());
        svc.update(values).await.unwrap();

        let settings = svc.store_settings().await.unwrap();
        assert_eq!(settings.tax_rate, 0.2);
        assert!(settings.auto_approve_reviews);
    }

    #[tokio::test]
    async fn test_rejects_invalid_values() {
        let svc = service().await;
        for (key, value) in [
            ("tax_rate", "1.5"),
            ("tax_rate", "abc"),
            ("flat_shipping_rate", "-1"),
            ("low_stock_threshold", "2.5"),
            ("auto_approve_reviews", "yes"),
        ] {
            let mut values = HashMap::new();
            values.insert(key.to_string(), value.to_string());
            assert!(
                matches!(svc.update(values).await, Err(ServiceError::Validation(_))),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_public_view_hides_internal_fields() {
        let json = serde_json::to_value(StoreSettings::default().public()).unwrap();
        assert!(json.get("lowStockThreshold").is_none());
        assert!(json.get("autoApproveReviews").is_none());
        assert_eq!(json["freeShippingThreshold"], 500.0);
    }
}

//! Category model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Product category (e.g. "Winter", "All-Season", "Performance")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// URL-friendly slug
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Number of products linked to this category
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or updating a category
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInput {
    pub name: Option<String>,
    /// Slug (optional, generated from name when absent)
    pub slug: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

//! Product model and listing filter types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Catalog visibility of a product
    pub enum ProductStatus {
        Active => "active",
        Inactive => "inactive",
        Draft => "draft",
    }
}

impl Default for ProductStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// A tire in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub sku: String,
    pub brand: String,
    pub model: String,
    /// Size designation, e.g. "225/45R17"
    pub size: String,
    /// Section width in millimetres
    pub width: Option<i64>,
    pub aspect_ratio: Option<i64>,
    /// Rim diameter in inches
    pub rim_diameter: Option<f64>,
    pub load_index: Option<String>,
    pub speed_rating: Option<String>,
    pub season_type: Option<String>,
    pub price: f64,
    pub sale_price: Option<f64>,
    pub stock_quantity: i64,
    pub status: ProductStatus,
    pub description: String,
    pub tags: Vec<String>,
    pub is_featured: bool,
    pub rating_average: f64,
    pub review_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Price charged at checkout: the sale price when one is set and lower.
    pub fn effective_price(&self) -> f64 {
        match self.sale_price {
            Some(sale) if sale > 0.0 && sale < self.price => sale,
            _ => self.price,
        }
    }

    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

/// Image attached to a product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub id: i64,
    pub product_id: i64,
    pub url: String,
    pub alt_text: Option<String>,
    pub sort_order: i64,
    pub is_primary: bool,
}

/// Product with its images (ordered by sort_order) and category IDs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductWithDetails {
    #[serde(flatten)]
    pub product: Product,
    pub images: Vec<ProductImage>,
    pub category_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub url: String,
    pub alt_text: Option<String>,
    pub sort_order: Option<i64>,
    pub is_primary: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductInput {
    pub name: String,
    pub slug: Option<String>,
    pub sku: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub size: String,
    pub width: Option<i64>,
    pub aspect_ratio: Option<i64>,
    pub rim_diameter: Option<f64>,
    pub load_index: Option<String>,
    pub speed_rating: Option<String>,
    pub season_type: Option<String>,
    pub price: f64,
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub stock_quantity: i64,
    pub status: Option<ProductStatus>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    #[serde(default)]
    pub images: Vec<ImageInput>,
}

/// Partial product update. `sale_price <= 0` clears the sale price.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub width: Option<i64>,
    pub aspect_ratio: Option<i64>,
    pub rim_diameter: Option<f64>,
    pub load_index: Option<String>,
    pub speed_rating: Option<String>,
    pub season_type: Option<String>,
    pub price: Option<f64>,
    pub sale_price: Option<f64>,
    pub stock_quantity: Option<i64>,
    pub status: Option<ProductStatus>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_featured: Option<bool>,
    /// Replaces the whole category set when present
    pub category_ids: Option<Vec<i64>>,
}

/// Sortable listing columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Price,
    Name,
    Brand,
    StockQuantity,
    Rating,
}

impl SortField {
    /// Map a client `sortBy` value; unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "createdAt" | "created_at" => Some(Self::CreatedAt),
            "updatedAt" | "updated_at" => Some(Self::UpdatedAt),
            "price" => Some(Self::Price),
            "name" => Some(Self::Name),
            "brand" => Some(Self::Brand),
            "stockQuantity" | "stock_quantity" => Some(Self::StockQuantity),
            "rating" => Some(Self::Rating),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "p.created_at",
            Self::UpdatedAt => "p.updated_at",
            Self::Price => "p.price",
            Self::Name => "p.name",
            Self::Brand => "p.brand",
            Self::StockQuantity => "p.stock_quantity",
            Self::Rating => "p.rating_average",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Validated listing filter. Every `Some` field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub width: Option<i64>,
    pub aspect_ratio: Option<i64>,
    pub rim_diameter: Option<f64>,
    pub season_type: Option<String>,
    pub speed_rating: Option<String>,
    pub load_index: Option<String>,
    pub status: Option<ProductStatus>,
    /// Category names or slugs
    pub categories: Vec<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub in_stock: Option<bool>,
    pub featured: Option<bool>,
    pub search: Option<String>,
    /// `None` means the default ordering (created_at) was requested
    pub sort_by: Option<SortField>,
    pub sort_order: SortOrder,
}

//! Product service
//!
//! Catalog listing with the storefront filter, free-text search and admin
//! maintenance of products and their images.
//!
//! Listing pipeline:
//! 1. raw query strings are parsed into a `ProductFilter`; malformed numbers
//!    are validation errors, the `all` sentinel means "no filter"
//! 2. category names/slugs are resolved to IDs (none resolving matches
//!    nothing)
//! 3. short or absent search terms page in SQL; longer ones load a bounded
//!    candidate set and match in process
//!
//! `total` always counts the set the returned page was cut from.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Cache, CacheLayer};
use crate::config::SearchConfig;
use crate::db::repositories::{CategoryRepository, CategoryScope, ProductRepository, ReviewRepository};
use crate::models::{
    CreateProductInput, ImageInput, ListParams, PagedResult, Product, ProductFilter, ProductImage,
    ProductStatus, ProductWithDetails, RatingSummary, SortField, SortOrder, UpdateProductInput,
};
use crate::services::category::CACHE_PATTERN_CATEGORY;
use crate::services::error::{slugify, ServiceError, ServiceResult};
use crate::services::search::{MatchTier, ProductMatcher};

const DEFAULT_PAGE_SIZE: u32 = 12;
const DEFAULT_FEATURED_LIMIT: i64 = 8;
const CONFLICT: &str = "A product with this SKU or slug already exists";

/// Raw listing query as sent by the storefront. Every value arrives as a
/// string so malformed numbers can be reported instead of silently dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub width: Option<String>,
    pub aspect_ratio: Option<String>,
    pub rim_diameter: Option<String>,
    pub season_type: Option<String>,
    pub speed_rating: Option<String>,
    pub load_index: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub in_stock: Option<String>,
    pub featured: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// `None` for absent, empty or `all` (any case)
fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn parse_number<T: std::str::FromStr>(value: &Option<String>, name: &str) -> ServiceResult<Option<T>> {
    match present(value) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ServiceError::Validation(format!("{} must be a number, got '{}'", name, raw))),
    }
}

fn parse_price(value: &Option<String>, name: &str) -> ServiceResult<Option<f64>> {
    match parse_number::<f64>(value, name)? {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ServiceError::Validation(format!(
            "{} must be a non-negative number",
            name
        ))),
        other => Ok(other),
    }
}

fn parse_bool(value: &Option<String>, name: &str) -> ServiceResult<Option<bool>> {
    match present(value).map(str::to_lowercase).as_deref() {
        None => Ok(None),
        Some("true") | Some("1") | Some("yes") => Ok(Some(true)),
        Some("false") | Some("0") | Some("no") => Ok(Some(false)),
        Some(other) => Err(ServiceError::Validation(format!(
            "{} must be true or false, got '{}'",
            name, other
        ))),
    }
}

impl ProductQuery {
    /// Validate into a filter and paging parameters. Without a `status`
    /// the storefront sees active products only; `status=all` lifts that.
    pub fn parse(&self) -> ServiceResult<(ProductFilter, ListParams)> {
        let text = |v: &Option<String>| present(v).map(str::to_string);

        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => Some(ProductStatus::Active),
            Some(s) if s.eq_ignore_ascii_case("all") => None,
            Some(s) => Some(
                s.parse::<ProductStatus>()
                    .map_err(|_| ServiceError::Validation(format!("Unknown status '{}'", s)))?,
            ),
        };

        let min_price = parse_price(&self.min_price, "minPrice")?;
        let max_price = parse_price(&self.max_price, "maxPrice")?;
        if let (Some(min), Some(max)) = (min_price, max_price) {
            if min > max {
                return Err(ServiceError::validation("minPrice cannot exceed maxPrice"));
            }
        }

        let page = parse_number::<u32>(&self.page, "page")?.unwrap_or(1);
        let limit = parse_number::<u32>(&self.limit, "limit")?.unwrap_or(DEFAULT_PAGE_SIZE);

        let filter = ProductFilter {
            brand: text(&self.brand),
            model: text(&self.model),
            size: text(&self.size),
            width: parse_number(&self.width, "width")?,
            aspect_ratio: parse_number(&self.aspect_ratio, "aspectRatio")?,
            rim_diameter: parse_number(&self.rim_diameter, "rimDiameter")?,
            season_type: text(&self.season_type),
            speed_rating: text(&self.speed_rating),
            load_index: text(&self.load_index),
            status,
            categories: present(&self.category)
                .map(|c| {
                    c.split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            min_price,
            max_price,
            in_stock: parse_bool(&self.in_stock, "inStock")?,
            featured: parse_bool(&self.featured, "featured")?,
            search: present(&self.search).map(str::to_string),
            // Unknown columns fall back to the default ordering
            sort_by: present(&self.sort_by).and_then(SortField::parse),
            sort_order: present(&self.sort_order)
                .and_then(SortOrder::parse)
                .unwrap_or_default(),
        };

        Ok((filter, ListParams::new(page, limit)))
    }
}

/// Product page payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: ProductWithDetails,
    pub rating_summary: RatingSummary,
}

pub struct ProductService {
    products: Arc<dyn ProductRepository>,
    categories: Arc<dyn CategoryRepository>,
    reviews: Arc<dyn ReviewRepository>,
    cache: Arc<Cache>,
    matcher: ProductMatcher,
    search: SearchConfig,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        categories: Arc<dyn CategoryRepository>,
        reviews: Arc<dyn ReviewRepository>,
        cache: Arc<Cache>,
        search: SearchConfig,
    ) -> Self {
        Self {
            products,
            categories,
            reviews,
            cache,
            matcher: ProductMatcher::new(&search),
            search,
        }
    }

    pub async fn list(&self, query: &ProductQuery) -> ServiceResult<PagedResult<ProductWithDetails>> {
        let (filter, params) = query.parse()?;
        self.list_filtered(&filter, &params).await
    }

    pub async fn list_filtered(
        &self,
        filter: &ProductFilter,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<ProductWithDetails>> {
        let category_ids = if filter.categories.is_empty() {
            None
        } else {
            Some(self.categories.resolve_ids(&filter.categories).await?)
        };
        let scope = match &category_ids {
            None => CategoryScope::Any,
            Some(ids) => CategoryScope::Within(ids),
        };

        let term = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|t| t.chars().count() > self.search.short_query_len);

        let (page, total) = match term {
            None => self.products.list(filter, scope, params).await?,
            Some(term) => {
                let candidates = self
                    .products
                    .list_candidates(filter, scope, self.search.max_candidates)
                    .await?;
                if candidates.len() as i64 >= self.search.max_candidates {
                    tracing::warn!(
                        limit = self.search.max_candidates,
                        "Search candidate limit reached, results may be incomplete"
                    );
                }

                let (matched, tier) = self
                    .matcher
                    .search(candidates, term, filter.sort_by.is_none());
                tracing::debug!(?tier, matched = matched.len(), "Product search");
                if tier == MatchTier::Substring {
                    tracing::debug!(term, "Fuzzy search found nothing, used substring fallback");
                }

                let total = matched.len() as i64;
                let page = matched
                    .into_iter()
                    .skip(params.offset() as usize)
                    .take(params.limit() as usize)
                    .collect();
                (page, total)
            }
        };

        let items = self.with_details(page).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Lookup by numeric id or slug
    pub async fn get(&self, id_or_slug: &str) -> ServiceResult<ProductDetail> {
        let id_or_slug = id_or_slug.trim();
        let product = match id_or_slug.parse::<i64>() {
            Ok(id) => self.products.get_by_id(id).await?,
            Err(_) => self.products.get_by_slug(id_or_slug).await?,
        }
        .ok_or_else(|| ServiceError::not_found("Product"))?;

        let rating_summary =
            RatingSummary::from_distribution(self.reviews.rating_distribution(product.id).await?);
        let product = self
            .with_details(vec![product])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Product"))?;

        Ok(ProductDetail {
            product,
            rating_summary,
        })
    }

    pub async fn featured(&self, limit: Option<i64>) -> ServiceResult<Vec<ProductWithDetails>> {
        let limit = limit.unwrap_or(DEFAULT_FEATURED_LIMIT).clamp(1, 50);
        let products = self.products.featured(limit).await?;
        self.with_details(products).await
    }

    pub async fn brands(&self) -> ServiceResult<Vec<String>> {
        Ok(self.products.brands().await?)
    }

    pub async fn create(&self, mut input: CreateProductInput) -> ServiceResult<ProductDetail> {
        input.name = input.name.trim().to_string();
        input.sku = input.sku.trim().to_string();
        if input.name.is_empty() {
            return Err(ServiceError::validation("Product name is required"));
        }
        if input.sku.is_empty() {
            return Err(ServiceError::validation("SKU is required"));
        }
        validate_money(input.price, "price")?;
        if let Some(sale) = input.sale_price {
            validate_money(sale, "salePrice")?;
        }
        if input.stock_quantity < 0 {
            return Err(ServiceError::validation("stockQuantity cannot be negative"));
        }
        input.sale_price = input.sale_price.filter(|s| *s > 0.0);
        input.tags = clean_tags(std::mem::take(&mut input.tags));
        let slug = product_slug(input.slug.as_deref(), &input.name)?;

        let created = self
            .products
            .create(&input, &slug)
            .await
            .map_err(|e| ServiceError::from_write(e, CONFLICT))?;
        self.invalidate_categories().await;

        tracing::info!(product_id = created.id, sku = %created.sku, "Product created");
        self.get(&created.id.to_string()).await
    }

    pub async fn update(&self, id: i64, input: UpdateProductInput) -> ServiceResult<ProductDetail> {
        let mut product = self
            .products
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product"))?;

        apply_update(&mut product, &input)?;
        self.products
            .update(&product)
            .await
            .map_err(|e| ServiceError::from_write(e, CONFLICT))?;

        if let Some(category_ids) = &input.category_ids {
            self.products.set_categories(id, category_ids).await?;
        }
        self.invalidate_categories().await;
        self.get(&id.to_string()).await
    }

    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.products.delete(id).await? {
            return Err(ServiceError::not_found("Product"));
        }
        self.invalidate_categories().await;
        tracing::info!(product_id = id, "Product deleted");
        Ok(())
    }

    pub async fn add_image(&self, product_id: i64, image: ImageInput) -> ServiceResult<ProductImage> {
        if image.url.trim().is_empty() {
            return Err(ServiceError::validation("Image url is required"));
        }
        if self.products.get_by_id(product_id).await?.is_none() {
            return Err(ServiceError::not_found("Product"));
        }
        Ok(self.products.add_image(product_id, &image).await?)
    }

    pub async fn delete_image(&self, product_id: i64, image_id: i64) -> ServiceResult<()> {
        if !self.products.delete_image(product_id, image_id).await? {
            return Err(ServiceError::not_found("Image"));
        }
        Ok(())
    }

    /// Attach images and category IDs, keeping the input order
    async fn with_details(&self, products: Vec<Product>) -> ServiceResult<Vec<ProductWithDetails>> {
        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        let mut images = self.products.images_for(&ids).await?;
        let mut categories: HashMap<i64, Vec<i64>> = self.products.category_ids_for(&ids).await?;

        Ok(products
            .into_iter()
            .map(|product| ProductWithDetails {
                images: images.remove(&product.id).unwrap_or_default(),
                category_ids: categories.remove(&product.id).unwrap_or_default(),
                product,
            })
            .collect())
    }

    async fn invalidate_categories(&self) {
        if let Err(e) = self.cache.delete_pattern(CACHE_PATTERN_CATEGORY).await {
            tracing::warn!("Failed to invalidate category cache: {:#}", e);
        }
    }
}

fn validate_money(value: f64, name: &str) -> ServiceResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ServiceError::Validation(format!(
            "{} must be a non-negative number",
            name
        )));
    }
    Ok(())
}

fn product_slug(requested: Option<&str>, name: &str) -> ServiceResult<String> {
    let slug = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(name),
    };
    if slug.is_empty() {
        return Err(ServiceError::validation("Product slug must contain letters or digits"));
    }
    Ok(slug)
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

fn apply_update(product: &mut Product, input: &UpdateProductInput) -> ServiceResult<()> {
    fn trimmed(value: &Option<String>) -> Option<String> {
        value.as_ref().map(|v| v.trim().to_string())
    }
    fn optional(value: &Option<String>) -> Option<Option<String>> {
        value
            .as_ref()
            .map(|v| Some(v.trim().to_string()).filter(|v| !v.is_empty()))
    }

    if let Some(name) = trimmed(&input.name) {
        if name.is_empty() {
            return Err(ServiceError::validation("Product name cannot be empty"));
        }
        product.name = name;
    }
    if let Some(slug) = input.slug.as_deref() {
        product.slug = product_slug(Some(slug), &product.name)?;
    }
    if let Some(sku) = trimmed(&input.sku) {
        if sku.is_empty() {
            return Err(ServiceError::validation("SKU cannot be empty"));
        }
        product.sku = sku;
    }
    if let Some(brand) = trimmed(&input.brand) {
        product.brand = brand;
    }
    if let Some(model) = trimmed(&input.model) {
        product.model = model;
    }
    if let Some(size) = trimmed(&input.size) {
        product.size = size;
    }
    if input.width.is_some() {
        product.width = input.width;
    }
    if input.aspect_ratio.is_some() {
        product.aspect_ratio = input.aspect_ratio;
    }
    if input.rim_diameter.is_some() {
        product.rim_diameter = input.rim_diameter;
    }
    if let Some(v) = optional(&input.load_index) {
        product.load_index = v;
    }
    if let Some(v) = optional(&input.speed_rating) {
        product.speed_rating = v;
    }
    if let Some(v) = optional(&input.season_type) {
        product.season_type = v;
    }
    if let Some(price) = input.price {
        validate_money(price, "price")?;
        product.price = price;
    }
    if let Some(sale) = input.sale_price {
        if !sale.is_finite() {
            return Err(ServiceError::validation("salePrice must be a number"));
        }
        product.sale_price = Some(sale).filter(|s| *s > 0.0);
    }
    if let Some(stock) = input.stock_quantity {
        if stock < 0 {
            return Err(ServiceError::validation("stockQuantity cannot be negative"));
        }
        product.stock_quantity = stock;
    }
    if let Some(status) = input.status {
        product.status = status;
    }
    if let Some(description) = &input.description {
        product.description = description.clone();
    }
    if let Some(tags) = &input.tags {
        product.tags = clean_tags(tags.clone());
    }
    if let Some(featured) = input.is_featured {
        product.is_featured = featured;
    }
    product.updated_at = Utc::now();
    Ok(())
}

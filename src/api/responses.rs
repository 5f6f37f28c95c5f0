//! Shared API response types
//!
//! Every paginated endpoint answers with the same shape:
//! `{ "items": [...], "pagination": { "page", "limit", "total", "totalPages" } }`.

use serde::Serialize;

use crate::models::PagedResult;

/// Pagination block of a list response
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
}

/// Paginated list response
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> From<PagedResult<T>> for PageResponse<T> {
    fn from(result: PagedResult<T>) -> Self {
        let pagination = Pagination {
            page: result.page,
            limit: result.per_page,
            total: result.total,
            total_pages: result.total_pages(),
        };
        Self {
            items: result.items,
            pagination,
        }
    }
}

//! Common API utilities and shared types

use serde::{Deserialize, Serialize};

use crate::models::ListParams;

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for listings other than the catalog
pub fn default_limit() -> u32 {
    20
}

/// `?page=&limit=&status=` as accepted by paginated list endpoints
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub status: Option<String>,
    pub search: Option<String>,
}

impl PageQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.limit)
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

/// `{ "status": "..." }` body of the status-change endpoints
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Plain acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

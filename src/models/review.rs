//! Product review model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Moderation state of a review
    pub enum ReviewStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub product_id: i64,
    pub user_id: i64,
    /// Reviewer display name
    pub author_name: String,
    pub rating: i64,
    pub title: String,
    pub comment: String,
    pub status: ReviewStatus,
    pub verified_purchase: bool,
    pub helpful_count: i64,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewInput {
    pub product_id: i64,
    pub rating: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Aggregate over approved reviews of one product
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average: f64,
    pub count: i64,
    /// Count per star, index 0 is one star
    pub distribution: [i64; 5],
}

impl RatingSummary {
    pub fn from_distribution(distribution: [i64; 5]) -> Self {
        let count: i64 = distribution.iter().sum();
        let weighted: i64 = distribution
            .iter()
            .enumerate()
            .map(|(i, n)| (i as i64 + 1) * n)
            .sum();
        let average = if count == 0 {
            0.0
        } else {
            (weighted as f64 / count as f64 * 10.0).round() / 10.0
        };
        Self {
            average,
            count,
            distribution,
        }
    }
}

/// Ordering for public review listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewSort {
    #[default]
    Newest,
    Helpful,
    Rating,
}

impl ReviewSort {
    pub fn parse(s: &str) -> Self {
        match s {
            "helpful" => Self::Helpful,
            "rating" => Self::Rating,
            _ => Self::Newest,
        }
    }

    pub fn order_by(&self) -> &'static str {
        match self {
            Self::Newest => "r.created_at DESC, r.id DESC",
            Self::Helpful => "r.helpful_count DESC, r.created_at DESC",
            Self::Rating => "r.rating DESC, r.created_at DESC",
        }
    }
}

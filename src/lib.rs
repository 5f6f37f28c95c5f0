//! Tirestore - backend for a tire e-commerce storefront
//!
//! Catalog with tire-specific filtering and fuzzy search, carts, Stripe
//! checkout, reviews, a blog, newsletters and an admin dashboard, served
//! as a JSON API under `/api`.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

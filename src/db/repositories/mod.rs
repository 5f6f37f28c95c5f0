//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository owns the SQL for one group of tables.

pub mod banner;
pub mod blog;
pub mod cart;
pub mod category;
pub mod contact;
pub mod dashboard;
pub mod newsletter;
pub mod order;
pub mod product;
pub mod review;
pub mod settings;
pub mod user;

pub use banner::{BannerRepository, SqlxBannerRepository};
pub use blog::{BlogRepository, PostQuery, SqlxBlogRepository};
pub use cart::{CartRepository, SqlxCartRepository};
pub use category::{CategoryRepository, SqlxCategoryRepository};
pub use contact::{ContactRepository, SqlxContactRepository};
pub use dashboard::{
    DailySales, DashboardRepository, LowStockProduct, SqlxDashboardRepository, StatusCount,
    StoreCounts, TopProduct,
};
pub use newsletter::{NewsletterRepository, SqlxNewsletterRepository};
pub use order::{OrderRepository, PaymentApplied, SqlxOrderRepository};
pub use product::{CategoryScope, ProductRepository, SqlxProductRepository};
pub use review::{NewReview, ReviewRepository, SqlxReviewRepository};
pub use settings::{Setting, SettingsRepository, SqlxSettingsRepository};
pub use user::{PasswordReset, SqlxUserRepository, UserRepository};

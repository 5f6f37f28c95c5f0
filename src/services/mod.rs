//! Services layer - Business logic
//!
//! Services implement the storefront's rules on top of the repositories and
//! the cache. Every service returns `ServiceError`; the API layer maps it to
//! HTTP in one place.

pub mod banner;
pub mod blog;
pub mod cart;
pub mod category;
pub mod contact;
pub mod dashboard;
pub mod email;
pub mod error;
pub mod newsletter;
pub mod order;
pub mod password;
pub mod payment;
pub mod product;
pub mod rate_limiter;
pub mod review;
pub mod search;
pub mod settings;
pub mod storage;
pub mod token;
pub mod user;

pub use banner::BannerService;
pub use blog::BlogService;
pub use cart::CartService;
pub use category::CategoryService;
pub use contact::ContactService;
pub use dashboard::{DashboardService, DashboardStats};
pub use email::{create_mailer, EmailService, Mailer, OutgoingEmail};
pub use error::{ServiceError, ServiceResult};
pub use newsletter::NewsletterService;
pub use order::{CheckoutDetails, CheckoutQuote, OrderService};
pub use password::{hash_password, verify_password};
pub use payment::{
    CheckoutSession, PaymentGateway, PaymentService, StripeGateway, WebhookOutcome,
};
pub use product::{ProductDetail, ProductQuery, ProductService};
pub use rate_limiter::LoginRateLimiter;
pub use review::{ProductReviews, ReviewService};
pub use search::ProductMatcher;
pub use settings::{PublicSettings, SettingsService, StoreSettings};
pub use storage::{create_storage, ObjectStorage, UploadService};
pub use token::{Claims, TokenService};
pub use user::{AuthResponse, UserService};

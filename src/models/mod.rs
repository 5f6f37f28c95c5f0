//! Data models
//!
//! Database entities and the request inputs that create or mutate them.
//! Entities serialize in camelCase, matching the storefront client.

/// Declares a lowercase string-backed enum with `as_str`, `Display` and
/// `FromStr` (case-insensitive).
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(anyhow::anyhow!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }
    };
}

mod banner;
mod blog;
mod cart;
mod category;
mod contact;
mod newsletter;
mod order;
mod pagination;
mod product;
mod review;
mod user;

pub use banner::{Banner, BannerInput};
pub use blog::{
    BlogComment, BlogPost, BlogPostInput, BlogSubscriber, CommentStatus, CreateCommentInput,
    PostStatus,
};
pub use cart::{CartItem, CartLine, CartSummary};
pub use category::{Category, CategoryInput};
pub use contact::{ContactMessage, ContactStatus, CreateContactInput};
pub use newsletter::{Campaign, CampaignInput, CampaignStatus, Subscriber, SubscriberStatus};
pub use order::{
    NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, OrderTotals, OrderWithItems,
    PaymentStatus, ShippingAddress,
};
pub use pagination::{ListParams, PagedResult};
pub use product::{
    CreateProductInput, ImageInput, Product, ProductFilter, ProductImage, ProductStatus,
    ProductWithDetails, SortField, SortOrder, UpdateProductInput,
};
pub use review::{CreateReviewInput, RatingSummary, Review, ReviewSort, ReviewStatus};
pub use user::{CreateUserInput, UpdateProfileInput, User, UserRole};

//! API middleware
//!
//! Shared application state, the error envelope, and authentication:
//! - `require_auth` validates the Bearer JWT and loads the user
//! - `require_admin` rejects non-admin users
//! - `AuthenticatedUser` pulls the loaded user out of the request

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, FromRequest, FromRequestParts, Request, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::{Config, StorageConfig};
use crate::db::repositories::{
    SqlxBannerRepository, SqlxBlogRepository, SqlxCartRepository, SqlxCategoryRepository,
    SqlxContactRepository, SqlxDashboardRepository, SqlxNewsletterRepository,
    SqlxOrderRepository, SqlxProductRepository, SqlxReviewRepository, SqlxSettingsRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    BannerService, BlogService, CartService, CategoryService, ContactService, DashboardService,
    EmailService, LoginRateLimiter, Mailer, NewsletterService, ObjectStorage, OrderService,
    PaymentGateway, PaymentService, ProductService, ReviewService, ServiceError, SettingsService,
    TokenService, UploadService, UserService,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub product_service: Arc<ProductService>,
    pub category_service: Arc<CategoryService>,
    pub cart_service: Arc<CartService>,
    pub order_service: Arc<OrderService>,
    pub payment_service: Arc<PaymentService>,
    pub review_service: Arc<ReviewService>,
    pub blog_service: Arc<BlogService>,
    pub newsletter_service: Arc<NewsletterService>,
    pub contact_service: Arc<ContactService>,
    pub banner_service: Arc<BannerService>,
    pub settings_service: Arc<SettingsService>,
    pub dashboard_service: Arc<DashboardService>,
    pub upload_service: Arc<UploadService>,
    pub storage_config: Arc<StorageConfig>,
    /// Peers allowed to report the client address via `X-Forwarded-For`
    pub trusted_proxies: Arc<Vec<IpAddr>>,
}

impl AppState {
    /// Wire repositories and services over one pool and cache. External
    /// systems (payment gateway, mail transport, object storage) come in
    /// ready-made so tests can substitute them.
    pub fn new(
        config: &Config,
        pool: DynDatabasePool,
        cache: Arc<Cache>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let product_repo = SqlxProductRepository::boxed(pool.clone());
        let category_repo = SqlxCategoryRepository::boxed(pool.clone());
        let review_repo = SqlxReviewRepository::boxed(pool.clone());
        let order_repo = SqlxOrderRepository::boxed(pool.clone());

        let email_service = Arc::new(EmailService::new(
            mailer,
            &config.server.frontend_url,
            &config.email.from_name,
            config.email.admin_address.clone(),
        ));
        let settings_service = Arc::new(SettingsService::new(
            SqlxSettingsRepository::boxed(pool.clone()),
            cache.clone(),
        ));

        let rate_limiter = Arc::new(LoginRateLimiter::new(cache.clone(), &config.auth));
        let user_service = Arc::new(UserService::new(
            user_repo.clone(),
            Arc::new(TokenService::new(&config.auth)),
            rate_limiter,
            email_service.clone(),
        ));

        let product_service = Arc::new(ProductService::new(
            product_repo.clone(),
            category_repo.clone(),
            review_repo.clone(),
            cache.clone(),
            config.search.clone(),
        ));
        let category_service = Arc::new(CategoryService::new(category_repo, cache.clone()));
        let cart_service = Arc::new(CartService::new(
            SqlxCartRepository::boxed(pool.clone()),
            product_repo.clone(),
        ));
        let order_service = Arc::new(OrderService::new(
            order_repo.clone(),
            cart_service.clone(),
            settings_service.clone(),
        ));
        let payment_service = Arc::new(PaymentService::new(
            gateway,
            order_service.clone(),
            user_repo,
            email_service.clone(),
            config.stripe.clone(),
        ));
        let review_service = Arc::new(ReviewService::new(
            review_repo,
            product_repo,
            order_repo.clone(),
            settings_service.clone(),
        ));

        Self {
            user_service,
            product_service,
            category_service,
            cart_service,
            order_service,
            payment_service,
            review_service,
            blog_service: Arc::new(BlogService::new(
                SqlxBlogRepository::boxed(pool.clone()),
                email_service.clone(),
            )),
            newsletter_service: Arc::new(NewsletterService::new(
                SqlxNewsletterRepository::boxed(pool.clone()),
                email_service.clone(),
            )),
            contact_service: Arc::new(ContactService::new(
                SqlxContactRepository::boxed(pool.clone()),
                email_service,
            )),
            banner_service: Arc::new(BannerService::new(
                SqlxBannerRepository::boxed(pool.clone()),
                cache,
            )),
            dashboard_service: Arc::new(DashboardService::new(
                SqlxDashboardRepository::boxed(pool.clone()),
                order_repo,
                settings_service.clone(),
            )),
            settings_service,
            upload_service: Arc::new(UploadService::new(storage, config.storage.clone())),
            storage_config: Arc::new(config.storage.clone()),
            trusted_proxies: Arc::new(config.server.trusted_proxies.clone()),
            pool,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
    #[serde(skip)]
    status: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
            status: None,
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.error.details = Some(details);
        error
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Extractor failures keep their own status (e.g. 413, 415)
    fn rejected(status: StatusCode, message: String) -> Self {
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "PAYLOAD_TOO_LARGE"
        } else {
            "VALIDATION_ERROR"
        };
        let mut error = Self::new(code, message);
        if status.is_client_error() && status != StatusCode::UNPROCESSABLE_ENTITY {
            error.status = Some(status.as_u16());
        }
        error
    }

    pub fn status(&self) -> StatusCode {
        if let Some(status) = self.status.and_then(|s| StatusCode::from_u16(s).ok()) {
            return status;
        }
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
            "PAYLOAD_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self
            .error
            .details
            .as_ref()
            .and_then(|d| d.get("retry_after"))
            .and_then(|v| v.as_u64());

        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => Self::validation_error(msg),
            ServiceError::NotFound(msg) => Self::not_found(msg),
            ServiceError::Conflict(msg) => Self::new("CONFLICT", msg),
            ServiceError::Unauthorized(msg) => Self::unauthorized(msg),
            ServiceError::Forbidden(msg) => Self::forbidden(msg),
            ServiceError::RateLimited { retry_after_secs } => Self::with_details(
                "RATE_LIMITED",
                format!("Too many attempts, retry in {} seconds", retry_after_secs),
                serde_json::json!({ "retry_after": retry_after_secs }),
            ),
            ServiceError::Upstream(msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                Self::new("UPSTREAM_ERROR", "Payment provider error, please try again")
            }
            ServiceError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                Self::internal_error("Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

/// `Json` whose rejections use the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl<T: Serialize> IntoResponse for ApiJson<T> {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

/// `Query` whose rejections use the error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Extract the Bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let claims = state.user_service.verify_token(token)?;
    let user = match state.user_service.me(claims.sub).await {
        Ok(user) => user,
        Err(ServiceError::NotFound(_)) => {
            return Err(ApiError::unauthorized("Invalid or expired token"))
        }
        Err(e) => return Err(e.into()),
    };

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Client address used for login throttling.
///
/// The socket peer, unless that peer is a trusted proxy; then the
/// rightmost `X-Forwarded-For` hop that is not itself a trusted proxy.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok());
        Ok(ClientIp(resolve_client_ip(peer, forwarded, &state.trusted_proxies)))
    }
}

fn resolve_client_ip(peer: Option<IpAddr>, forwarded: Option<&str>, trusted: &[IpAddr]) -> IpAddr {
    let Some(peer) = peer else {
        return IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    };
    if !trusted.contains(&peer) {
        return peer;
    }
    // Each proxy appends on the right; hops left of the rightmost
    // untrusted one are whatever the client sent
    let Some(forwarded) = forwarded else {
        return peer;
    };
    let mut last = peer;
    for hop in forwarded.rsplit(',').map(str::trim) {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted.contains(&ip) => last = ip,
            Ok(ip) => return ip,
            Err(_) => return last,
        }
    }
    last
}

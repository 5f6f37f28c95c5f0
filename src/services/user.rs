//! User service
//!
//! Account lifecycle and authentication:
//! - registration (the first account becomes admin when no admin exists)
//! - login with brute-force protection
//! - profile and password changes
//! - password reset through a one-hour, single-use token

use chrono::{Duration, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::UserRepository;
use crate::models::{CreateUserInput, UpdateProfileInput, User, UserRole};
use crate::services::email::EmailService;
use crate::services::error::{is_valid_email, ServiceError, ServiceResult};
use crate::services::password::{check_password_policy, hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::token::{Claims, TokenService};

const RESET_TOKEN_TTL_HOURS: i64 = 1;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// A user together with a freshly issued access token
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    tokens: Arc<TokenService>,
    limiter: Arc<LoginRateLimiter>,
    email: Arc<EmailService>,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        tokens: Arc<TokenService>,
        limiter: Arc<LoginRateLimiter>,
        email: Arc<EmailService>,
    ) -> Self {
        Self {
            user_repo,
            tokens,
            limiter,
            email,
        }
    }

    pub async fn register(&self, input: CreateUserInput) -> ServiceResult<AuthResponse> {
        let email = input.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::validation("A valid email address is required"));
        }
        check_password_policy(&input.password).map_err(ServiceError::Validation)?;

        if self.user_repo.get_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict("Email is already registered".to_string()));
        }

        let role = if self.user_repo.count_by_role(UserRole::Admin).await? == 0 {
            UserRole::Admin
        } else {
            UserRole::Customer
        };

        let now = Utc::now();
        let user = User {
            id: 0,
            email,
            password_hash: hash_password(&input.password)?,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            phone: clean_phone(input.phone),
            role,
            created_at: now,
            updated_at: now,
        };

        // Two concurrent registrations can both pass the lookup above
        let user = self
            .user_repo
            .create(&user)
            .await
            .map_err(|e| ServiceError::from_write(e, "Email is already registered"))?;

        tracing::info!(user_id = user.id, role = %user.role, "User registered");
        let token = self.tokens.issue(&user)?;
        Ok(AuthResponse { user, token })
    }

    /// Unknown email and wrong password fail with the same message.
    pub async fn login(&self, email: &str, password: &str, ip: IpAddr) -> ServiceResult<AuthResponse> {
        self.limiter.check_ip(ip).await?;
        self.limiter.check(email, ip).await?;

        let user = match self.user_repo.get_by_email(email).await? {
            Some(user) if verify_password(password, &user.password_hash)? => user,
            _ => {
                self.limiter.record_failure(email, ip).await?;
                tracing::info!(%ip, "Failed login attempt");
                return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
            }
        };

        self.limiter.record_success(email, ip).await?;
        let token = self.tokens.issue(&user)?;
        Ok(AuthResponse { user, token })
    }

    /// Validate a bearer token
    pub fn verify_token(&self, token: &str) -> ServiceResult<Claims> {
        self.tokens.verify(token)
    }

    pub async fn me(&self, user_id: i64) -> ServiceResult<User> {
        self.user_repo
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))
    }

    pub async fn update_profile(&self, user_id: i64, input: UpdateProfileInput) -> ServiceResult<User> {
        let mut user = self.me(user_id).await?;
        if let Some(first_name) = input.first_name {
            user.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = input.last_name {
            user.last_name = last_name.trim().to_string();
        }
        if input.phone.is_some() {
            user.phone = clean_phone(input.phone);
        }
        Ok(self.user_repo.update(&user).await?)
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        let user = self.me(user_id).await?;
        if !verify_password(current_password, &user.password_hash)? {
            return Err(ServiceError::Unauthorized(
                "Current password is incorrect".to_string(),
            ));
        }
        check_password_policy(new_password).map_err(ServiceError::Validation)?;

        self.user_repo
            .update_password(user.id, &hash_password(new_password)?)
            .await?;
        tracing::info!(user_id, "Password changed");
        Ok(())
    }

    /// Always succeeds so the response does not reveal whether an account exists.
    pub async fn forgot_password(&self, email: &str) -> ServiceResult<()> {
        let Some(user) = self.user_repo.get_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
        self.user_repo
            .create_reset_token(user.id, &token, expires_at)
            .await?;

        self.email.dispatch(self.email.password_reset(&user.email, &user.display_name(), &token));
        tracing::info!(user_id = user.id, "Password reset token issued");
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> ServiceResult<()> {
        check_password_policy(new_password).map_err(ServiceError::Validation)?;

        let reset = self
            .user_repo
            .get_reset_token(token.trim())
            .await?
            .filter(|r| r.is_valid_at(Utc::now()))
            .ok_or_else(|| ServiceError::validation("Reset token is invalid or has expired"))?;

        // Losing the race to a concurrent reset leaves the token spent
        if !self.user_repo.consume_reset_token(&reset.token).await? {
            return Err(ServiceError::validation("Reset token is invalid or has expired"));
        }

        self.user_repo
            .update_password(reset.user_id, &hash_password(new_password)?)
            .await?;
        tracing::info!(user_id = reset.user_id, "Password reset completed");
        Ok(())
    }
}

fn clean_phone(phone: Option<String>) -> Option<String> {
    phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
}

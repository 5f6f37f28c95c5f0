//! Access tokens
//!
//! HS256-signed JWTs carrying the user id and role. Tokens are stateless;
//! a token stays valid until `exp`.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::models::{User, UserRole};
use crate::services::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            ttl_secs: config.token_ttl_hours.max(1) * 3600,
        }
    }

    pub fn issue(&self, user: &User) -> ServiceResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            role: user.role,
            exp: now + self.ttl_secs,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> ServiceResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Rejected access token: {}", e);
                ServiceError::Unauthorized("Invalid or expired token".to_string())
            })
    }
}

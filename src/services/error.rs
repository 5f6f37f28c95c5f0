//! Service error type shared by every service.
//!
//! The API layer converts this into its HTTP envelope in one place.

use crate::db::is_unique_violation;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many attempts, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// A third-party call (payment provider) failed
    #[error("{0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    /// Map a repository error, turning unique-constraint failures into
    /// `Conflict` with the given message.
    pub fn from_write(err: anyhow::Error, conflict: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            Self::Conflict(conflict.into())
        } else {
            Self::Internal(err)
        }
    }
}

/// Lowercase, hyphen-separated ASCII slug. Returns an empty string when
/// nothing alphanumeric remains.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Round a money amount to cents
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Michelin Pilot Sport 4S"), "michelin-pilot-sport-4s");
        assert_eq!(slugify("  All-Season / Winter!! "), "all-season-winter");
        assert_eq!(slugify("225/45R17"), "225-45r17");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("driver@example.com"));
        assert!(!is_valid_email("driver@example"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(10.005_f64 + 0.0001), 10.01);
        assert_eq!(round_cents(99.994), 99.99);
        assert_eq!(round_cents(0.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_slug_is_url_safe(text in ".{0,60}") {
            let slug = slugify(&text);
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
        }
    }
}

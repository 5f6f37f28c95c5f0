//! Configuration management
//!
//! This module handles loading and parsing configuration for the storefront.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Two families of environment variables are honoured: the prefixed
//! `TIRESTORE_*` names and the conventional deployment names
//! (`DATABASE_URL`, `JWT_SECRET`, `STRIPE_SECRET_KEY`, `AWS_REGION`, ...).
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Authentication and login throttling
    #[serde(default)]
    pub auth: AuthConfig,
    /// Stripe payment configuration
    #[serde(default)]
    pub stripe: StripeConfig,
    /// Object storage for uploads
    #[serde(default)]
    pub storage: StorageConfig,
    /// Outgoing email
    #[serde(default)]
    pub email: EmailConfig,
    /// Product search tuning
    #[serde(default)]
    pub search: SearchConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_frontend_url")]
    pub cors_origin: String,
    /// Storefront URL used to build links in emails
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Reverse proxies whose `X-Forwarded-For` header is believed.
    /// Empty means the socket peer is always the client.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_frontend_url(),
            frontend_url: default_frontend_url(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL or file path
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/tirestore.db".to_string()
}

fn default_max_connections() -> u32 {
    20
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache driver (memory or redis)
    #[serde(default)]
    pub driver: CacheDriver,
    /// Redis connection URL (optional)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Cache TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: CacheDriver::default(),
            redis_url: None,
            ttl_seconds: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    3600
}

/// Cache driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    /// In-memory cache (default)
    #[default]
    Memory,
    /// Redis cache
    Redis,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing access tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Access token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Failed logins per identifier+IP before blocking
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Window in which failed logins are counted
    #[serde(default = "default_login_window_secs")]
    pub login_window_secs: u64,
    /// How long a block lasts once triggered
    #[serde(default = "default_login_block_secs")]
    pub login_block_secs: u64,
    /// Login requests allowed per IP per minute
    #[serde(default = "default_ip_requests_per_minute")]
    pub ip_requests_per_minute: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            max_login_attempts: default_max_login_attempts(),
            login_window_secs: default_login_window_secs(),
            login_block_secs: default_login_block_secs(),
            ip_requests_per_minute: default_ip_requests_per_minute(),
        }
    }
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24 * 7
}

fn default_max_login_attempts() -> u32 {
    5
}

fn default_login_window_secs() -> u64 {
    15 * 60
}

fn default_login_block_secs() -> u64 {
    15 * 60
}

fn default_ip_requests_per_minute() -> u32 {
    20
}

/// Stripe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    /// Secret API key (sk_...)
    #[serde(default)]
    pub secret_key: String,
    /// Webhook signing secret (whsec_...)
    #[serde(default)]
    pub webhook_secret: String,
    /// ISO currency code for payment intents
    #[serde(default = "default_currency")]
    pub currency: String,
    /// API base URL
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// Accepted clock skew for webhook timestamps
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            currency: default_currency(),
            api_base: default_stripe_api_base(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_tolerance() -> i64 {
    300
}

/// Object storage driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    /// Local directory served by the application (default)
    #[default]
    Local,
    /// Amazon S3 or an S3-compatible endpoint
    S3,
}

/// Upload storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: StorageDriver,
    /// Directory for the local driver
    #[serde(default = "default_upload_path")]
    pub path: PathBuf,
    /// Public URL prefix for stored objects
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_access_key: Option<String>,
    #[serde(default)]
    pub s3_secret_key: Option<String>,
    /// Maximum file size in bytes (default: 10MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Allowed image MIME types
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::default(),
            path: default_upload_path(),
            public_base_url: default_public_base_url(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_public_base_url() -> String {
    "/uploads".to_string()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_allowed_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/gif".to_string(),
        "image/webp".to_string(),
    ]
}

impl StorageConfig {
    /// Check if a MIME type is allowed
    pub fn is_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t == mime_type)
    }

    /// Get file extension for a MIME type
    pub fn get_extension(&self, mime_type: &str) -> &'static str {
        match mime_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            _ => "bin",
        }
    }
}

/// SMTP configuration. Without a host, mail is logged instead of sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Recipient for contact form notifications
    #[serde(default)]
    pub admin_address: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: default_smtp_from(),
            from_name: default_from_name(),
            admin_address: None,
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from() -> String {
    "no-reply@tirestore.local".to_string()
}

fn default_from_name() -> String {
    "Tire Store".to_string()
}

/// Product search tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum fuzzy score per query character for a token to count as matched
    #[serde(default = "default_min_score_per_char")]
    pub min_score_per_char: i64,
    /// Queries of at most this many characters skip matching entirely
    #[serde(default = "default_short_query_len")]
    pub short_query_len: usize,
    /// Upper bound on rows loaded for in-process matching, at least 1
    #[serde(default = "default_max_candidates")]
    pub max_candidates: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score_per_char: default_min_score_per_char(),
            short_query_len: default_short_query_len(),
            max_candidates: default_max_candidates(),
        }
    }
}

fn default_min_score_per_char() -> i64 {
    10
}

fn default_short_query_len() -> usize {
    2
}

fn default_max_candidates() -> i64 {
    5000
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config.normalized())
    }

    /// Load configuration from file with environment variable overrides
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config.normalized())
    }

    /// Pull out-of-range values back to the nearest usable one
    fn normalized(mut self) -> Self {
        if self.search.max_candidates < 1 {
            tracing::warn!(
                configured = self.search.max_candidates,
                "search.max_candidates must be positive, using 1"
            );
            self.search.max_candidates = 1;
        }
        self
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server
        if let Some(host) = env_any(&["TIRESTORE_SERVER_HOST"]) {
            self.server.host = host;
        }
        if let Some(port) = env_any(&["TIRESTORE_SERVER_PORT", "PORT"]) {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Some(frontend) = env_any(&["TIRESTORE_FRONTEND_URL", "FRONTEND_URL"]) {
            self.server.cors_origin = frontend.clone();
            self.server.frontend_url = frontend;
        }
        if let Some(origin) = env_any(&["TIRESTORE_SERVER_CORS_ORIGIN"]) {
            self.server.cors_origin = origin;
        }
        if let Some(proxies) = env_any(&["TIRESTORE_TRUSTED_PROXIES"]) {
            // Unparseable entries are dropped
            self.server.trusted_proxies = proxies
                .split(',')
                .filter_map(|p| p.trim().parse::<IpAddr>().ok())
                .collect();
        }

        // Database
        if let Some(url) = env_any(&["TIRESTORE_DATABASE_URL", "DATABASE_URL"]) {
            self.database.url = url;
        }

        // Cache
        if let Some(driver) = env_any(&["TIRESTORE_CACHE_DRIVER"]) {
            match driver.to_lowercase().as_str() {
                "memory" => self.cache.driver = CacheDriver::Memory,
                "redis" => self.cache.driver = CacheDriver::Redis,
                _ => {} // Ignore invalid values
            }
        }
        if let Some(redis_url) = env_any(&["TIRESTORE_CACHE_REDIS_URL", "REDIS_URL"]) {
            self.cache.redis_url = Some(redis_url);
        }
        if let Some(ttl) = env_any(&["TIRESTORE_CACHE_TTL_SECONDS"]) {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = ttl;
            }
        }

        // Auth
        if let Some(secret) = env_any(&["TIRESTORE_JWT_SECRET", "JWT_SECRET"]) {
            self.auth.jwt_secret = secret;
        }

        // Stripe
        if let Some(key) = env_any(&["TIRESTORE_STRIPE_SECRET_KEY", "STRIPE_SECRET_KEY"]) {
            self.stripe.secret_key = key;
        }
        if let Some(secret) = env_any(&["TIRESTORE_STRIPE_WEBHOOK_SECRET", "STRIPE_WEBHOOK_SECRET"]) {
            self.stripe.webhook_secret = secret;
        }

        // Storage
        if let Some(driver) = env_any(&["TIRESTORE_STORAGE_DRIVER"]) {
            match driver.to_lowercase().as_str() {
                "local" => self.storage.driver = StorageDriver::Local,
                "s3" => self.storage.driver = StorageDriver::S3,
                _ => {}
            }
        }
        if let Some(bucket) = env_any(&["TIRESTORE_S3_BUCKET", "AWS_S3_BUCKET"]) {
            self.storage.s3_bucket = Some(bucket);
        }
        if let Some(region) = env_any(&["TIRESTORE_S3_REGION", "AWS_REGION"]) {
            self.storage.s3_region = Some(region);
        }
        if let Some(key) = env_any(&["AWS_ACCESS_KEY_ID"]) {
            self.storage.s3_access_key = Some(key);
        }
        if let Some(secret) = env_any(&["AWS_SECRET_ACCESS_KEY"]) {
            self.storage.s3_secret_key = Some(secret);
        }

        // Email
        if let Some(host) = env_any(&["TIRESTORE_SMTP_HOST", "SMTP_HOST"]) {
            self.email.smtp_host = Some(host);
        }
        if let Some(port) = env_any(&["TIRESTORE_SMTP_PORT", "SMTP_PORT"]) {
            if let Ok(port) = port.parse::<u16>() {
                self.email.smtp_port = port;
            }
        }
        if let Some(user) = env_any(&["TIRESTORE_SMTP_USERNAME", "SMTP_USERNAME", "SMTP_USER"]) {
            self.email.smtp_username = Some(user);
        }
        if let Some(pass) = env_any(&["TIRESTORE_SMTP_PASSWORD", "SMTP_PASSWORD", "SMTP_PASS"]) {
            self.email.smtp_password = Some(pass);
        }
        if let Some(from) = env_any(&["TIRESTORE_SMTP_FROM", "SMTP_FROM"]) {
            self.email.from_address = from;
        }
        if let Some(admin) = env_any(&["TIRESTORE_ADMIN_EMAIL", "ADMIN_EMAIL"]) {
            self.email.admin_address = Some(admin);
        }
    }
}

/// First non-empty value among the given variable names
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OVERRIDE_VARS: &[&str] = &[
        "TIRESTORE_SERVER_HOST",
        "TIRESTORE_SERVER_PORT",
        "PORT",
        "TIRESTORE_FRONTEND_URL",
        "FRONTEND_URL",
        "TIRESTORE_SERVER_CORS_ORIGIN",
        "TIRESTORE_TRUSTED_PROXIES",
        "TIRESTORE_DATABASE_URL",
        "DATABASE_URL",
        "TIRESTORE_CACHE_DRIVER",
        "TIRESTORE_CACHE_REDIS_URL",
        "REDIS_URL",
        "TIRESTORE_CACHE_TTL_SECONDS",
        "TIRESTORE_JWT_SECRET",
        "JWT_SECRET",
        "TIRESTORE_STRIPE_SECRET_KEY",
        "STRIPE_SECRET_KEY",
        "TIRESTORE_STRIPE_WEBHOOK_SECRET",
        "STRIPE_WEBHOOK_SECRET",
        "TIRESTORE_STORAGE_DRIVER",
        "TIRESTORE_S3_BUCKET",
        "AWS_S3_BUCKET",
        "TIRESTORE_S3_REGION",
        "AWS_REGION",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "TIRESTORE_SMTP_HOST",
        "SMTP_HOST",
        "TIRESTORE_SMTP_PORT",
        "SMTP_PORT",
    ];

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_env() {
        for var in OVERRIDE_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::path::Path::new("nonexistent_config.yml");
        let config = Config::load(path).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.database.url, "data/tirestore.db");
        assert_eq!(config.cache.driver, CacheDriver::Memory);
        assert_eq!(config.storage.driver, StorageDriver::Local);
        assert_eq!(config.auth.max_login_attempts, 5);
        assert_eq!(config.search.short_query_len, 2);
        assert_eq!(config.stripe.currency, "usd");
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 5000);
        assert!(config.email.smtp_host.is_none());
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 3001\nsearch:\n  max_candidates: 100\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.search.max_candidates, 100);
        assert_eq!(config.search.min_score_per_char, 10);
    }

    #[test]
    fn test_load_full_sections() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"
server:
  host: "127.0.0.1"
  port: 9000
  frontend_url: "https://tires.example.com"
database:
  url: "sqlite:shop.db"
cache:
  driver: redis
  redis_url: "redis://localhost:6379"
auth:
  jwt_secret: "s3cret"
  max_login_attempts: 3
stripe:
  currency: "eur"
storage:
  driver: s3
  s3_bucket: "tire-images"
"#).unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.frontend_url, "https://tires.example.com");
        assert_eq!(config.database.url, "sqlite:shop.db");
        assert_eq!(config.cache.driver, CacheDriver::Redis);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.auth.max_login_attempts, 3);
        assert_eq!(config.stripe.currency, "eur");
        assert_eq!(config.storage.driver, StorageDriver::S3);
        assert_eq!(config.storage.s3_bucket.as_deref(), Some("tire-images"));
    }

    #[test]
    fn test_non_positive_max_candidates_is_clamped() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "search:\n  max_candidates: 0\n").unwrap();
        assert_eq!(Config::load(file.path()).unwrap().search.max_candidates, 1);

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "search:\n  max_candidates: -25\n").unwrap();
        assert_eq!(Config::load(file.path()).unwrap().search.max_candidates, 1);
    }

    #[test]
    fn test_trusted_proxies_from_file_and_env() {
        let _guard = lock_env();
        clear_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  trusted_proxies:\n    - \"10.0.0.1\"\n").unwrap();

        let config = Config::load_with_env(file.path()).unwrap();
        assert_eq!(config.server.trusted_proxies, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);

        std::env::set_var("TIRESTORE_TRUSTED_PROXIES", "127.0.0.1, not-an-ip, ::1");
        let config = Config::load_with_env(file.path()).unwrap();
        clear_env();

        assert_eq!(
            config.server.trusted_proxies,
            vec!["127.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse::<IpAddr>().unwrap()]
        );
        assert!(Config::default().server.trusted_proxies.is_empty());
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("parse"));
    }

    #[test]
    fn test_conventional_env_names_override_file() {
        let _guard = lock_env();
        clear_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "database:\n  url: \"file.db\"\n").unwrap();

        std::env::set_var("DATABASE_URL", "sqlite:env.db");
        std::env::set_var("JWT_SECRET", "from-env");
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_abc");
        std::env::set_var("FRONTEND_URL", "https://shop.example.com");
        std::env::set_var("AWS_S3_BUCKET", "bucket");

        let config = Config::load_with_env(file.path()).unwrap();
        clear_env();

        assert_eq!(config.database.url, "sqlite:env.db");
        assert_eq!(config.auth.jwt_secret, "from-env");
        assert_eq!(config.stripe.secret_key, "sk_test_123");
        assert_eq!(config.stripe.webhook_secret, "whsec_abc");
        assert_eq!(config.server.frontend_url, "https://shop.example.com");
        assert_eq!(config.server.cors_origin, "https://shop.example.com");
        assert_eq!(config.storage.s3_bucket.as_deref(), Some("bucket"));
    }

    #[test]
    fn test_prefixed_env_wins_over_conventional() {
        let _guard = lock_env();
        clear_env();

        std::env::set_var("TIRESTORE_DATABASE_URL", "prefixed.db");
        std::env::set_var("DATABASE_URL", "conventional.db");

        let config = Config::load_with_env(std::path::Path::new("missing.yml")).unwrap();
        clear_env();

        assert_eq!(config.database.url, "prefixed.db");
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let _guard = lock_env();
        clear_env();

        std::env::set_var("TIRESTORE_SERVER_PORT", "not-a-port");
        std::env::set_var("TIRESTORE_CACHE_DRIVER", "memcached");
        std::env::set_var("SMTP_PORT", "-1");

        let config = Config::load_with_env(std::path::Path::new("missing.yml")).unwrap();
        clear_env();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.cache.driver, CacheDriver::Memory);
        assert_eq!(config.email.smtp_port, 587);
    }

    #[test]
    fn test_storage_type_checks() {
        let storage = StorageConfig::default();
        assert!(storage.is_type_allowed("image/png"));
        assert!(!storage.is_type_allowed("application/pdf"));
        assert_eq!(storage.get_extension("image/jpeg"), "jpg");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(20))]

            /// Serializing a config and loading it back preserves the values
            #[test]
            fn config_roundtrip(port in 1u16..=65535, attempts in 1u32..50, currency in "[a-z]{3}") {
                let mut config = Config::default();
                config.server.port = port;
                config.auth.max_login_attempts = attempts;
                config.stripe.currency = currency.clone();

                let yaml = serde_yaml::to_string(&config).unwrap();
                let mut file = NamedTempFile::new().unwrap();
                write!(file, "{}", yaml).unwrap();

                let loaded = Config::load(file.path()).unwrap();
                prop_assert_eq!(loaded.server.port, port);
                prop_assert_eq!(loaded.auth.max_login_attempts, attempts);
                prop_assert_eq!(loaded.stripe.currency, currency);
            }
        }
    }
}

//! Database layer
//!
//! SQLite pool, embedded migrations and the repositories for every
//! storefront table.
//!
//! # Usage
//!
//! ```ignore
//! use tirestore::config::DatabaseConfig;
//! use tirestore::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool, SqliteDatabase};

/// True when the error chain contains a SQLite UNIQUE / PRIMARY KEY violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .map(|db| db.is_unique_violation())
            .unwrap_or(false)
    })
}

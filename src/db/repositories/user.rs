//! User repository
//!
//! Database operations for users and password-reset tokens.

use crate::db::DynDatabasePool;
use crate::models::{User, UserRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;

/// One-time password reset token
#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl PasswordReset {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. Fails with a unique violation on duplicate email.
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Lookup by email, case-insensitive
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist profile fields and role
    async fn update(&self, user: &User) -> Result<User>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn count_by_role(&self, role: UserRole) -> Result<i64>;

    async fn create_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_reset_token(&self, token: &str) -> Result<Option<PasswordReset>>;

    /// Mark a token used. Returns false when it was already used.
    async fn consume_reset_token(&self, token: &str) -> Result<bool>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        create_user(self.pool.sqlite(), user).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        get_user_by_id(self.pool.sqlite(), id).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        get_user_by_email(self.pool.sqlite(), email).await
    }

    async fn update(&self, user: &User) -> Result<User> {
        update_user(self.pool.sqlite(), user).await
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to update password")?;
        Ok(())
    }

    async fn count_by_role(&self, role: UserRole) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE role = ?")
            .bind(role.as_str())
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to count users")?;
        Ok(row.get("count"))
    }

    async fn create_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO password_resets (user_id, token, expires_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to store password reset token")?;
        Ok(())
    }

    async fn get_reset_token(&self, token: &str) -> Result<Option<PasswordReset>> {
        let row = sqlx::query(
            "SELECT id, user_id, token, expires_at, used FROM password_resets WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get password reset token")?;

        Ok(row.map(|row| PasswordReset {
            id: row.get("id"),
            user_id: row.get("user_id"),
            token: row.get("token"),
            expires_at: row.get("expires_at"),
            used: row.get::<i64, _>("used") != 0,
        }))
    }

    async fn consume_reset_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE password_resets SET used = 1 WHERE token = ? AND used = 0")
            .bind(token)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to consume password reset token")?;
        Ok(result.rows_affected() > 0)
    }
}

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, phone, role, created_at, updated_at";

async fn create_user(pool: &SqlitePool, user: &User) -> Result<User> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name, phone, role)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone)
    .bind(user.role.as_str())
    .execute(pool)
    .await
    .context("Failed to create user")?;

    get_user_by_id(pool, result.last_insert_rowid())
        .await?
        .context("User not found after insert")
}

async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user).transpose()
}

async fn get_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM users WHERE LOWER(email) = LOWER(?)",
        USER_COLUMNS
    ))
    .bind(email.trim())
    .fetch_optional(pool)
    .await
    .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user).transpose()
}

async fn update_user(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE users
        SET first_name = ?, last_name = ?, phone = ?, role = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone)
    .bind(user.role.as_str())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by_id(pool, user.id)
        .await?
        .context("User not found after update")
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        phone: row.get("phone"),
        role: role.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    async fn setup_test_repo() -> SqlxUserRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxUserRepository::new(pool)
    }

    fn new_user(email: &str) -> User {
        User {
            id: 0,
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Pat".to_string(),
            last_name: "Driver".to_string(),
            phone: None,
            role: UserRole::Customer,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_case_insensitive() {
        let repo = setup_test_repo().await;
        let created = repo.create(&new_user("pat@example.com")).await.unwrap();
        assert!(created.id > 0);

        let found = repo.get_by_email("PAT@Example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let repo = setup_test_repo().await;
        repo.create(&new_user("pat@example.com")).await.unwrap();

        let err = repo.create(&new_user("pat@example.com")).await.unwrap_err();
        assert!(crate::db::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_update_profile() {
        let repo = setup_test_repo().await;
        let mut user = repo.create(&new_user("pat@example.com")).await.unwrap();
        user.first_name = "Robin".to_string();
        user.phone = Some("555-0100".to_string());

        let updated = repo.update(&user).await.unwrap();
        assert_eq!(updated.first_name, "Robin");
        assert_eq!(updated.phone.as_deref(), Some("555-0100"));
    }

    #[tokio::test]
    async fn test_reset_token_single_use() {
        let repo = setup_test_repo().await;
        let user = repo.create(&new_user("pat@example.com")).await.unwrap();

        repo.create_reset_token(user.id, "tok", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        let reset = repo.get_reset_token("tok").await.unwrap().unwrap();
        assert!(reset.is_valid_at(Utc::now()));

        assert!(repo.consume_reset_token("tok").await.unwrap());
        assert!(!repo.consume_reset_token("tok").await.unwrap());
        let reset = repo.get_reset_token("tok").await.unwrap().unwrap();
        assert!(!reset.is_valid_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_count_by_role() {
        let repo = setup_test_repo().await;
        repo.create(&new_user("a@example.com")).await.unwrap();
        let mut admin = new_user("b@example.com");
        admin.role = UserRole::Admin;
        repo.create(&admin).await.unwrap();

        assert_eq!(repo.count_by_role(UserRole::Customer).await.unwrap(), 1);
        assert_eq!(repo.count_by_role(UserRole::Admin).await.unwrap(), 1);
    }
}

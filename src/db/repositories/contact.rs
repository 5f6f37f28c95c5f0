//! Contact message repository

use crate::db::DynDatabasePool;
use crate::models::{ContactMessage, ContactStatus, CreateContactInput, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use std::sync::Arc;

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn create(&self, input: &CreateContactInput) -> Result<ContactMessage>;

    async fn get(&self, id: i64) -> Result<Option<ContactMessage>>;

    async fn list(
        &self,
        status: Option<ContactStatus>,
        params: &ListParams,
    ) -> Result<(Vec<ContactMessage>, i64)>;

    async fn update_status(&self, id: i64, status: ContactStatus) -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn count_by_status(&self, status: ContactStatus) -> Result<i64>;
}

pub struct SqlxContactRepository {
    pool: DynDatabasePool,
}

impl SqlxContactRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ContactRepository> {
        Arc::new(Self::new(pool))
    }
}

const CONTACT_COLUMNS: &str =
    "id, name, email, phone, subject, message, status, created_at, updated_at";

#[async_trait]
impl ContactRepository for SqlxContactRepository {
    async fn create(&self, input: &CreateContactInput) -> Result<ContactMessage> {
        let result = sqlx::query(
            "INSERT INTO contact_messages (name, email, phone, subject, message) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(input.name.trim())
        .bind(input.email.trim())
        .bind(input.phone.as_deref())
        .bind(input.subject.trim())
        .bind(input.message.trim())
        .execute(self.pool.sqlite())
        .await
        .context("Failed to save contact message")?;

        self.get(result.last_insert_rowid())
            .await?
            .context("Contact message not found after insert")
    }

    async fn get(&self, id: i64) -> Result<Option<ContactMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contact_messages WHERE id = ?",
            CONTACT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get contact message")?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn list(
        &self,
        status: Option<ContactStatus>,
        params: &ListParams,
    ) -> Result<(Vec<ContactMessage>, i64)> {
        let pool = self.pool.sqlite();
        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM contact_messages WHERE 1 = 1");
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM contact_messages WHERE 1 = 1",
            CONTACT_COLUMNS
        ));
        if let Some(status) = status {
            count_qb.push(" AND status = ").push_bind(status.as_str());
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());

        let total: i64 = count_qb.build().fetch_one(pool).await?.get("count");
        let rows = qb
            .build()
            .fetch_all(pool)
            .await
            .context("Failed to list contact messages")?;
        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>>>()?;
        Ok((messages, total))
    }

    async fn update_status(&self, id: i64, status: ContactStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE contact_messages SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to update contact message")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM contact_messages WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete contact message")?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: ContactStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM contact_messages WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to count contact messages")?;
        Ok(row.get("count"))
    }
}

fn row_to_message(row: &SqliteRow) -> Result<ContactMessage> {
    let status: String = row.get("status");
    Ok(ContactMessage {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        subject: row.get("subject"),
        message: row.get("message"),
        status: status.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    fn input(subject: &str) -> CreateContactInput {
        CreateContactInput {
            name: "Jordan".into(),
            email: "jordan@example.com".into(),
            phone: None,
            subject: subject.into(),
            message: "Do you stock 225/45R17?".into(),
        }
    }

    #[tokio::test]
    async fn test_status_filter_and_count() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let repo = SqlxContactRepository::new(pool);

        let first = repo.create(&input("Sizes")).await.unwrap();
        repo.create(&input("Delivery")).await.unwrap();
        assert_eq!(repo.count_by_status(ContactStatus::New).await.unwrap(), 2);

        assert!(repo.update_status(first.id, ContactStatus::Read).await.unwrap());
        let (unread, total) = repo
            .list(Some(ContactStatus::New), &ListParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(unread[0].subject, "Delivery");

        assert!(repo.delete(first.id).await.unwrap());
        assert!(repo.get(first.id).await.unwrap().is_none());
    }
}

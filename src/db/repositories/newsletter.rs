//! Newsletter repository

use crate::db::DynDatabasePool;
use crate::models::{Campaign, CampaignStatus, ListParams, Subscriber, SubscriberStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait NewsletterRepository: Send + Sync {
    /// Insert a subscriber or flip an unsubscribed one back to subscribed.
    /// `token` is only used for new rows.
    async fn subscribe(&self, email: &str, name: Option<&str>, token: &str) -> Result<Subscriber>;

    /// Returns false when the token is unknown
    async fn unsubscribe(&self, token: &str) -> Result<bool>;

    async fn list_subscribers(
        &self,
        status: Option<SubscriberStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Subscriber>, i64)>;

    /// Every currently subscribed address, oldest first
    async fn subscribed(&self) -> Result<Vec<Subscriber>>;

    async fn create_campaign(&self, subject: &str, content: &str) -> Result<Campaign>;

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>>;

    async fn list_campaigns(&self, params: &ListParams) -> Result<(Vec<Campaign>, i64)>;

    /// Drafts only; other campaigns come back unchanged
    async fn update_campaign(&self, id: i64, subject: &str, content: &str) -> Result<Option<Campaign>>;

    async fn delete_campaign(&self, id: i64) -> Result<bool>;

    /// Move a draft to `sending`. Returns false when it was not a draft, so
    /// only one caller ever delivers a campaign.
    async fn claim_for_sending(&self, id: i64) -> Result<bool>;

    /// Put a claimed campaign back to `draft` after a failed start
    async fn release_claim(&self, id: i64) -> Result<()>;

    /// Finish a claimed campaign. Returns false when it was not `sending`.
    async fn mark_sent(&self, id: i64, recipient_count: i64) -> Result<bool>;
}

pub struct SqlxNewsletterRepository {
    pool: DynDatabasePool,
}

impl SqlxNewsletterRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NewsletterRepository> {
        Arc::new(Self::new(pool))
    }
}

const SUBSCRIBER_COLUMNS: &str =
    "id, email, name, status, unsubscribe_token, created_at, updated_at";
const CAMPAIGN_COLUMNS: &str =
    "id, subject, content, status, recipient_count, sent_at, created_at, updated_at";

#[async_trait]
impl NewsletterRepository for SqlxNewsletterRepository {
    async fn subscribe(&self, email: &str, name: Option<&str>, token: &str) -> Result<Subscriber> {
        let pool = self.pool.sqlite();
        sqlx::query(
            r#"
            INSERT INTO newsletter_subscribers (email, name, unsubscribe_token) VALUES (?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                status = 'subscribed',
                name = COALESCE(excluded.name, newsletter_subscribers.name),
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(email)
        .bind(name)
        .bind(token)
        .execute(pool)
        .await
        .context("Failed to subscribe")?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM newsletter_subscribers WHERE email = ?",
            SUBSCRIBER_COLUMNS
        ))
        .bind(email)
        .fetch_one(pool)
        .await
        .context("Subscriber not found after upsert")?;
        row_to_subscriber(&row)
    }

    async fn unsubscribe(&self, token: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE newsletter_subscribers SET status = 'unsubscribed', updated_at = CURRENT_TIMESTAMP WHERE unsubscribe_token = ?",
        )
        .bind(token)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to unsubscribe")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscribers(
        &self,
        status: Option<SubscriberStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Subscriber>, i64)> {
        let pool = self.pool.sqlite();
        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM newsletter_subscribers WHERE 1 = 1");
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM newsletter_subscribers WHERE 1 = 1",
            SUBSCRIBER_COLUMNS
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
            .context("Failed to list subscribers")?;
        let subscribers = rows.iter().map(row_to_subscriber).collect::<Result<Vec<_>>>()?;
        Ok((subscribers, total))
    }

    async fn subscribed(&self) -> Result<Vec<Subscriber>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM newsletter_subscribers WHERE status = 'subscribed' ORDER BY id",
            SUBSCRIBER_COLUMNS
        ))
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to load subscribed addresses")?;
        rows.iter().map(row_to_subscriber).collect()
    }

    async fn create_campaign(&self, subject: &str, content: &str) -> Result<Campaign> {
        let pool = self.pool.sqlite();
        let result = sqlx::query("INSERT INTO newsletter_campaigns (subject, content) VALUES (?, ?)")
            .bind(subject)
            .bind(content)
            .execute(pool)
            .await
            .context("Failed to create campaign")?;
        get_campaign(pool, result.last_insert_rowid())
            .await?
            .context("Campaign not found after insert")
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        get_campaign(self.pool.sqlite(), id).await
    }

    async fn list_campaigns(&self, params: &ListParams) -> Result<(Vec<Campaign>, i64)> {
        let pool = self.pool.sqlite();
        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM newsletter_campaigns")
            .fetch_one(pool)
            .await?
            .get("count");
        let rows = sqlx::query(&format!(
            "SELECT {} FROM newsletter_campaigns ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list campaigns")?;
        let campaigns = rows.iter().map(row_to_campaign).collect::<Result<Vec<_>>>()?;
        Ok((campaigns, total))
    }

    async fn update_campaign(&self, id: i64, subject: &str, content: &str) -> Result<Option<Campaign>> {
        let pool = self.pool.sqlite();
        sqlx::query(
            "UPDATE newsletter_campaigns SET subject = ?, content = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ? AND status = 'draft'",
        )
        .bind(subject)
        .bind(content)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update campaign")?;
        get_campaign(pool, id).await
    }

    async fn delete_campaign(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM newsletter_campaigns WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete campaign")?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_for_sending(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE newsletter_campaigns SET status = 'sending', updated_at = CURRENT_TIMESTAMP WHERE id = ? AND status = 'draft'",
        )
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to claim campaign")?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE newsletter_campaigns SET status = 'draft', updated_at = CURRENT_TIMESTAMP WHERE id = ? AND status = 'sending'",
        )
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to release campaign")?;
        Ok(())
    }

    async fn mark_sent(&self, id: i64, recipient_count: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE newsletter_campaigns
            SET status = 'sent', recipient_count = ?, sent_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = 'sending'
            "#,
        )
        .bind(recipient_count)
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to mark campaign sent")?;
        Ok(result.rows_affected() > 0)
    }
}

async fn get_campaign(pool: &SqlitePool, id: i64) -> Result<Option<Campaign>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM newsletter_campaigns WHERE id = ?",
        CAMPAIGN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get campaign")?;
    row.as_ref().map(row_to_campaign).transpose()
}

fn row_to_subscriber(row: &SqliteRow) -> Result<Subscriber> {
    let status: String = row.get("status");
    Ok(Subscriber {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        status: status.parse()?,
        unsubscribe_token: row.get("unsubscribe_token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_campaign(row: &SqliteRow) -> Result<Campaign> {
    let status: String = row.get("status");
    Ok(Campaign {
        id: row.get("id"),
        subject: row.get("subject"),
        content: row.get("content"),
        status: status.parse::<CampaignStatus>()?,
        recipient_count: row.get("recipient_count"),
        sent_at: row.get("sent_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SqlxNewsletterRepository {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        SqlxNewsletterRepository::new(pool)
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_token() {
        let repo = setup().await;
        let first = repo.subscribe("n@example.com", Some("Nia"), "tok-1").await.unwrap();
        assert!(repo.unsubscribe("tok-1").await.unwrap());
        assert!(repo.subscribed().await.unwrap().is_empty());

        let again = repo.subscribe("n@example.com", None, "tok-2").await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, SubscriberStatus::Subscribed);
        assert_eq!(again.unsubscribe_token, "tok-1");
        assert_eq!(again.name.as_deref(), Some("Nia"));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let repo = setup().await;
        assert!(!repo.unsubscribe("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_then_mark_sent_only_once() {
        let repo = setup().await;
        let campaign = repo.create_campaign("Winter deals", "<p>Hi</p>").await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        // A draft cannot skip the claim
        assert!(!repo.mark_sent(campaign.id, 3).await.unwrap());

        assert!(repo.claim_for_sending(campaign.id).await.unwrap());
        assert!(!repo.claim_for_sending(campaign.id).await.unwrap());
        let sending = repo.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(sending.status, CampaignStatus::Sending);

        assert!(repo.mark_sent(campaign.id, 3).await.unwrap());
        assert!(!repo.mark_sent(campaign.id, 3).await.unwrap());
        assert!(!repo.claim_for_sending(campaign.id).await.unwrap());

        let sent = repo.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(sent.status, CampaignStatus::Sent);
        assert_eq!(sent.recipient_count, 3);
        assert!(sent.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_release_claim_returns_to_draft() {
        let repo = setup().await;
        let campaign = repo.create_campaign("Tread check", "<p>Hi</p>").await.unwrap();
        assert!(repo.claim_for_sending(campaign.id).await.unwrap());
        repo.release_claim(campaign.id).await.unwrap();

        let draft = repo.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(draft.status, CampaignStatus::Draft);
        assert!(repo.claim_for_sending(campaign.id).await.unwrap());
    }
}

//! Newsletter service

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::NewsletterRepository;
use crate::models::{
    Campaign, CampaignInput, CampaignStatus, ListParams, PagedResult, Subscriber, SubscriberStatus,
};
use crate::services::email::EmailService;
use crate::services::error::{is_valid_email, ServiceError, ServiceResult};

const MAX_SUBJECT_LEN: usize = 200;
const ALREADY_SENT: &str = "Campaign has already been sent";
const BEING_SENT: &str = "Campaign is being sent";
/// Messages in flight at once while sending a campaign
const SEND_CONCURRENCY: usize = 8;

pub struct NewsletterService {
    repo: Arc<dyn NewsletterRepository>,
    email: Arc<EmailService>,
}

impl NewsletterService {
    pub fn new(repo: Arc<dyn NewsletterRepository>, email: Arc<EmailService>) -> Self {
        Self { repo, email }
    }

    /// Subscribe, or re-subscribe an address that left earlier
    pub async fn subscribe(&self, email: &str, name: Option<String>) -> ServiceResult<Subscriber> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::validation("A valid email address is required"));
        }
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let token = Uuid::new_v4().simple().to_string();
        let subscriber = self.repo.subscribe(&email, name.as_deref(), &token).await?;
        tracing::info!(subscriber_id = subscriber.id, "Newsletter subscription");
        Ok(subscriber)
    }

    pub async fn unsubscribe(&self, token: &str) -> ServiceResult<()> {
        let token = token.trim();
        if token.is_empty() || !self.repo.unsubscribe(token).await? {
            return Err(ServiceError::not_found("Subscription"));
        }
        Ok(())
    }

    pub async fn list_subscribers(
        &self,
        status: Option<&str>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<Subscriber>> {
        let status = match status.map(str::trim).filter(|s| !s.is_empty() && *s != "all") {
            Some(s) => Some(s.parse::<SubscriberStatus>().map_err(|_| {
                ServiceError::Validation(format!("Unknown subscriber status '{}'", s))
            })?),
            None => None,
        };
        let (items, total) = self.repo.list_subscribers(status, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn list_campaigns(&self, params: &ListParams) -> ServiceResult<PagedResult<Campaign>> {
        let (items, total) = self.repo.list_campaigns(params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn get_campaign(&self, id: i64) -> ServiceResult<Campaign> {
        self.repo
            .get_campaign(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Campaign"))
    }

    pub async fn create_campaign(&self, input: CampaignInput) -> ServiceResult<Campaign> {
        let (subject, content) = campaign_fields(input.subject, input.content)?;
        let campaign = self.repo.create_campaign(&subject, &content).await?;
        tracing::info!(campaign_id = campaign.id, "Campaign drafted");
        Ok(campaign)
    }

    /// Only drafts can be edited
    pub async fn update_campaign(&self, id: i64, input: CampaignInput) -> ServiceResult<Campaign> {
        let current = self.get_campaign(id).await?;
        ensure_draft(&current)?;
        let (subject, content) = campaign_fields(
            input.subject.or(Some(current.subject)),
            input.content.or(Some(current.content)),
        )?;
        let updated = self
            .repo
            .update_campaign(id, &subject, &content)
            .await?
            .ok_or_else(|| ServiceError::not_found("Campaign"))?;
        // Claimed by a send between the read and the write
        ensure_draft(&updated)?;
        Ok(updated)
    }

    /// A campaign in the middle of a send cannot be removed
    pub async fn delete_campaign(&self, id: i64) -> ServiceResult<()> {
        if self.get_campaign(id).await?.status == CampaignStatus::Sending {
            return Err(ServiceError::Conflict(BEING_SENT.to_string()));
        }
        if !self.repo.delete_campaign(id).await? {
            return Err(ServiceError::not_found("Campaign"));
        }
        Ok(())
    }

    /// Mail the campaign to every subscribed address, each with its own
    /// unsubscribe link. `recipient_count` is the number actually delivered.
    ///
    /// The draft is claimed before any mail goes out, so concurrent calls
    /// deliver it once and the losers get a conflict.
    pub async fn send_campaign(&self, id: i64) -> ServiceResult<Campaign> {
        let campaign = self.get_campaign(id).await?;
        if !self.repo.claim_for_sending(id).await? {
            let current = self.get_campaign(id).await?;
            ensure_draft(&current)?;
            return Err(ServiceError::Conflict(BEING_SENT.to_string()));
        }

        let subscribers = match self.repo.subscribed().await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                self.repo.release_claim(id).await?;
                return Err(e.into());
            }
        };
        let total = subscribers.len();
        let messages: Vec<_> = subscribers
            .into_iter()
            .map(|subscriber| {
                let message = self.email.campaign(
                    &subscriber.email,
                    &campaign.subject,
                    &campaign.content,
                    &subscriber.unsubscribe_token,
                );
                (subscriber.id, message)
            })
            .collect();

        let delivered = stream::iter(messages)
            .map(|(subscriber_id, message)| {
                let email = Arc::clone(&self.email);
                async move {
                    match email.send(message).await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(
                                campaign_id = id,
                                subscriber_id,
                                "Campaign delivery failed: {:#}",
                                e
                            );
                            false
                        }
                    }
                }
            })
            .buffer_unordered(SEND_CONCURRENCY)
            .filter(|delivered| futures::future::ready(*delivered))
            .count()
            .await as i64;

        if !self.repo.mark_sent(id, delivered).await? {
            return Err(ServiceError::Conflict(ALREADY_SENT.to_string()));
        }
        tracing::info!(
            campaign_id = id,
            subscribers = total,
            delivered,
            "Campaign sent"
        );
        self.get_campaign(id).await
    }
}

fn ensure_draft(campaign: &Campaign) -> ServiceResult<()> {
    match campaign.status {
        CampaignStatus::Draft => Ok(()),
        CampaignStatus::Sending => Err(ServiceError::Conflict(BEING_SENT.to_string())),
        CampaignStatus::Sent => Err(ServiceError::Conflict(ALREADY_SENT.to_string())),
    }
}

fn campaign_fields(subject: Option<String>, content: Option<String>) -> ServiceResult<(String, String)> {
    let subject = subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::validation("Subject is required"))?;
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(ServiceError::Validation(format!(
            "Subject must be at most {} characters",
            MAX_SUBJECT_LEN
        )));
    }
    let content = content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ServiceError::validation("Content is required"))?;
    Ok((subject, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxNewsletterRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::services::email::testing::RecordingMailer;

    async fn service() -> (NewsletterService, Arc<RecordingMailer>) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let email = Arc::new(EmailService::new(mailer.clone(), "http://shop.test", "Tire Shop", None));
        (
            NewsletterService::new(SqlxNewsletterRepository::boxed(pool), email),
            mailer,
        )
    }

    fn campaign_input(subject: &str) -> CampaignInput {
        CampaignInput {
            subject: Some(subject.to_string()),
            content: Some("<p>20% off all-season sets this week.</p>".to_string()),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_and_resubscribe() {
        let (svc, _) = service().await;
        let sub = svc.subscribe("Rider@Example.com", Some("Rider".into())).await.unwrap();
        assert_eq!(sub.email, "rider@example.com");
        assert_eq!(sub.status, SubscriberStatus::Subscribed);

        svc.unsubscribe(&sub.unsubscribe_token).await.unwrap();
        let params = ListParams::default();
        assert_eq!(svc.list_subscribers(Some("unsubscribed"), &params).await.unwrap().total, 1);

        let again = svc.subscribe("rider@example.com", None).await.unwrap();
        assert_eq!(again.status, SubscriberStatus::Subscribed);
        assert_eq!(again.name.as_deref(), Some("Rider"));
        assert_eq!(svc.list_subscribers(None, &params).await.unwrap().total, 1);

        assert!(matches!(svc.unsubscribe("unknown").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(
            svc.subscribe("bad", None).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_campaign_to_subscribed_only() {
        let (svc, mailer) = service().await;
        let a = svc.subscribe("a@example.com", None).await.unwrap();
        svc.subscribe("b@example.com", None).await.unwrap();
        let gone = svc.subscribe("c@example.com", None).await.unwrap();
        svc.unsubscribe(&gone.unsubscribe_token).await.unwrap();

        let campaign = svc.create_campaign(campaign_input("Spring sale")).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        let sent = svc.send_campaign(campaign.id).await.unwrap();
        assert_eq!(sent.status, CampaignStatus::Sent);
        assert_eq!(sent.recipient_count, 2);
        assert!(sent.sent_at.is_some());

        // Delivery order is not fixed
        let mut recipients = mailer.recipients();
        recipients.sort();
        assert_eq!(recipients, vec!["a@example.com".to_string(), "b@example.com".to_string()]);
        let to_a = mailer
            .sent
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.to == "a@example.com")
            .cloned()
            .unwrap();
        assert!(to_a.text.contains(&a.unsubscribe_token));

        assert!(matches!(svc.send_campaign(campaign.id).await, Err(ServiceError::Conflict(_))));
        assert!(matches!(
            svc.update_campaign(campaign.id, campaign_input("Edited")).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_campaign_crud() {
        let (svc, _) = service().await;
        assert!(matches!(
            svc.create_campaign(CampaignInput::default()).await,
            Err(ServiceError::Validation(_))
        ));

        let campaign = svc.create_campaign(campaign_input("Draft")).await.unwrap();
        let updated = svc
            .update_campaign(
                campaign.id,
                CampaignInput {
                    subject: Some("Final".into()),
                    content: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.subject, "Final");
        assert_eq!(updated.content, campaign.content);
        assert_eq!(svc.list_campaigns(&ListParams::default()).await.unwrap().total, 1);

        svc.delete_campaign(campaign.id).await.unwrap();
        assert!(matches!(svc.get_campaign(campaign.id).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_sends_deliver_once() {
        let (svc, mailer) = service().await;
        for address in ["d@example.com", "e@example.com", "f@example.com"] {
            svc.subscribe(address, None).await.unwrap();
        }
        let campaign = svc.create_campaign(campaign_input("Flash sale")).await.unwrap();

        let (first, second) = tokio::join!(svc.send_campaign(campaign.id), svc.send_campaign(campaign.id));
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(ServiceError::Conflict(_))))
                .count(),
            1
        );
        assert_eq!(mailer.recipients().len(), 3);

        let sent = svc.get_campaign(campaign.id).await.unwrap();
        assert_eq!(sent.status, CampaignStatus::Sent);
        assert_eq!(sent.recipient_count, 3);
    }

    #[tokio::test]
    async fn test_sending_campaign_is_locked() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let repo = SqlxNewsletterRepository::boxed(pool);
        let mailer = Arc::new(RecordingMailer::default());
        let email = Arc::new(EmailService::new(mailer.clone(), "http://shop.test", "Tire Shop", None));
        let svc = NewsletterService::new(repo.clone(), email);

        svc.subscribe("g@example.com", None).await.unwrap();
        let campaign = svc.create_campaign(campaign_input("Locked")).await.unwrap();
        assert!(repo.claim_for_sending(campaign.id).await.unwrap());

        assert!(matches!(svc.send_campaign(campaign.id).await, Err(ServiceError::Conflict(_))));
        assert!(matches!(
            svc.update_campaign(campaign.id, campaign_input("Edited")).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(svc.delete_campaign(campaign.id).await, Err(ServiceError::Conflict(_))));
        assert!(mailer.recipients().is_empty());
    }
}

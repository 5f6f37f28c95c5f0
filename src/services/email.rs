//! Outgoing email
//!
//! `Mailer` is the transport seam: SMTP through lettre when a host is
//! configured, otherwise a mailer that only logs. `EmailService` renders the
//! storefront's messages on top of it.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use crate::config::EmailConfig;
use crate::models::{BlogPost, ContactMessage, OrderWithItems};

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig, host: &str) -> Result<Self> {
        // 465 is implicit TLS; anything else negotiates STARTTLS
        let builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
        .port(config.smtp_port);

        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid from address: {}", e))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid recipient {}: {}", email.to, e))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone());

        let message = match &email.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                html.clone(),
            )),
            None => builder.body(email.text.clone()),
        }
        .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;
        Ok(())
    }
}

/// Used when no SMTP host is configured
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        tracing::info!(to = %email.to, subject = %email.subject, "Email not sent (no SMTP host configured)");
        Ok(())
    }
}

pub fn create_mailer(config: &EmailConfig) -> Result<Arc<dyn Mailer>> {
    match config.smtp_host.as_deref().filter(|h| !h.trim().is_empty()) {
        Some(host) => {
            let mailer = SmtpMailer::new(config, host).context("Failed to configure SMTP")?;
            tracing::info!(host, port = config.smtp_port, "SMTP mailer configured");
            Ok(Arc::new(mailer))
        }
        None => {
            tracing::warn!("No SMTP host configured, outgoing email will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// Renders and dispatches storefront emails
pub struct EmailService {
    mailer: Arc<dyn Mailer>,
    frontend_url: String,
    store_name: String,
    admin_address: Option<String>,
}

impl EmailService {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        frontend_url: &str,
        store_name: &str,
        admin_address: Option<String>,
    ) -> Self {
        Self {
            mailer,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            store_name: store_name.to_string(),
            admin_address,
        }
    }

    pub async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.mailer.send(&email).await
    }

    /// Send in the background; failures are logged, never surfaced.
    pub fn dispatch(&self, email: OutgoingEmail) {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&email).await {
                tracing::warn!(to = %email.to, subject = %email.subject, "Email delivery failed: {:#}", e);
            }
        });
    }

    pub fn password_reset(&self, to: &str, name: &str, token: &str) -> OutgoingEmail {
        let link = format!(
            "{}/reset-password?token={}",
            self.frontend_url,
            urlencoding::encode(token)
        );
        OutgoingEmail {
            to: to.to_string(),
            subject: format!("Reset your {} password", self.store_name),
            text: format!(
                "Hi {},\n\n\
                 We received a request to reset your password.\n\n\
                 Open this link within one hour to choose a new one:\n{}\n\n\
                 If you did not ask for this, ignore this email.",
                name, link
            ),
            html: Some(format!(
                "<p>Hi {0},</p>\
                 <p>We received a request to reset your password.</p>\
                 <p><a href=\"{1}\">Choose a new password</a> (valid for one hour).</p>\
                 <p>If you did not ask for this, ignore this email.</p>",
                name, link
            )),
        }
    }

    pub fn order_confirmation(&self, order: &OrderWithItems) -> OutgoingEmail {
        let lines: Vec<String> = order
            .items
            .iter()
            .map(|i| format!("{} x {} ({:.2})", i.quantity, i.product_name, i.total_price))
            .collect();
        OutgoingEmail {
            to: order.order.email.clone(),
            subject: format!("Order {} confirmed", order.order.order_number),
            text: format!(
                "Thanks for shopping at {}.\n\n{}\n\nSubtotal: {:.2}\nTax: {:.2}\nShipping: {:.2}\nTotal: {:.2}\n\n\
                 Track your order at {}/orders/{}",
                self.store_name,
                lines.join("\n"),
                order.order.subtotal,
                order.order.tax,
                order.order.shipping,
                order.order.total,
                self.frontend_url,
                order.order.id
            ),
            html: None,
        }
    }

    /// Notification for the store admin; None when no admin address is set
    pub fn contact_notification(&self, message: &ContactMessage) -> Option<OutgoingEmail> {
        let to = self.admin_address.as_ref()?;
        Some(OutgoingEmail {
            to: to.clone(),
            subject: format!("New contact message: {}", message.subject),
            text: format!(
                "From: {} <{}>\nPhone: {}\n\n{}",
                message.name,
                message.email,
                message.phone.as_deref().unwrap_or("-"),
                message.message
            ),
            html: None,
        })
    }

    pub fn blog_post_published(&self, to: &str, post: &BlogPost) -> OutgoingEmail {
        let link = format!("{}/blog/{}", self.frontend_url, post.slug);
        OutgoingEmail {
            to: to.to_string(),
            subject: format!("New on the {} blog: {}", self.store_name, post.title),
            text: format!("{}\n\n{}\n\nRead more: {}", post.title, post.excerpt, link),
            html: Some(format!(
                "<h2>{}</h2><p>{}</p><p><a href=\"{}\">Read more</a></p>",
                post.title, post.excerpt, link
            )),
        }
    }

    pub fn campaign(&self, to: &str, subject: &str, content: &str, unsubscribe_token: &str) -> OutgoingEmail {
        let unsubscribe = format!(
            "{}/newsletter/unsubscribe?token={}",
            self.frontend_url,
            urlencoding::encode(unsubscribe_token)
        );
        OutgoingEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            text: format!("{}\n\n--\nUnsubscribe: {}", content, unsubscribe),
            html: Some(format!(
                "{}<hr><p style=\"font-size:12px\"><a href=\"{}\">Unsubscribe</a></p>",
                content, unsubscribe
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingMailer;
    use super::*;

    fn service(mailer: Arc<RecordingMailer>) -> EmailService {
        EmailService::new(mailer, "https://shop.example.com/", "Tire Store", None)
    }

    #[test]
    fn test_reset_link_uses_frontend_url() {
        let email = service(Arc::new(RecordingMailer::default())).password_reset("a@b.co", "Ada", "tok en");
        assert!(email
            .text
            .contains("https://shop.example.com/reset-password?token=tok%20en"));
        assert!(email.text.starts_with("Hi Ada,"));
    }

    #[test]
    fn test_campaign_carries_unsubscribe_link() {
        let email = service(Arc::new(RecordingMailer::default()))
            .campaign("a@b.co", "Winter deals", "<p>20% off</p>", "abc");
        assert!(email.html.unwrap().contains("/newsletter/unsubscribe?token=abc"));
    }

    #[test]
    fn test_contact_notification_requires_admin_address() {
        let mailer = Arc::new(RecordingMailer::default());
        let message = ContactMessage {
            id: 1,
            name: "Jo".into(),
            email: "jo@example.com".into(),
            phone: None,
            subject: "Fitting".into(),
            message: "Hello".into(),
            status: crate::models::ContactStatus::New,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert!(service(mailer.clone()).contact_notification(&message).is_none());

        let with_admin = EmailService::new(mailer, "http://x", "S", Some("admin@x.co".into()));
        assert_eq!(with_admin.contact_notification(&message).unwrap().to, "admin@x.co");
    }

    #[tokio::test]
    async fn test_send_goes_through_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(mailer.clone());
        svc.send(svc.password_reset("r@example.com", "R", "t")).await.unwrap();
        assert_eq!(mailer.recipients(), vec!["r@example.com".to_string()]);
    }

    #[test]
    fn test_create_mailer_without_host_logs() {
        assert!(create_mailer(&EmailConfig::default()).is_ok());
    }
}

//! Contact form service

use std::sync::Arc;

use crate::db::repositories::ContactRepository;
use crate::models::{ContactMessage, ContactStatus, CreateContactInput, ListParams, PagedResult};
use crate::services::email::EmailService;
use crate::services::error::{is_valid_email, ServiceError, ServiceResult};

const MAX_NAME_LEN: usize = 100;
const MAX_SUBJECT_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 5000;

pub struct ContactService {
    repo: Arc<dyn ContactRepository>,
    email: Arc<EmailService>,
}

impl ContactService {
    pub fn new(repo: Arc<dyn ContactRepository>, email: Arc<EmailService>) -> Self {
        Self { repo, email }
    }

    /// Store the message and notify the store admin in the background
    pub async fn submit(&self, input: CreateContactInput) -> ServiceResult<ContactMessage> {
        let input = validate(input)?;
        let message = self.repo.create(&input).await?;
        tracing::info!(message_id = message.id, "Contact message received");

        if let Some(notification) = self.email.contact_notification(&message) {
            self.email.dispatch(notification);
        }
        Ok(message)
    }

    pub async fn list(
        &self,
        status: Option<&str>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<ContactMessage>> {
        let status = match status.map(str::trim).filter(|s| !s.is_empty() && *s != "all") {
            Some(s) => Some(parse_status(s)?),
            None => None,
        };
        let (items, total) = self.repo.list(status, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn update_status(&self, id: i64, status: &str) -> ServiceResult<ContactMessage> {
        let status = parse_status(status)?;
        if !self.repo.update_status(id, status).await? {
            return Err(ServiceError::not_found("Message"));
        }
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Message"))
    }

    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.repo.delete(id).await? {
            return Err(ServiceError::not_found("Message"));
        }
        Ok(())
    }
}

fn validate(input: CreateContactInput) -> ServiceResult<CreateContactInput> {
    let name = input.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "Name is required and must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    let email = input.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ServiceError::validation("A valid email address is required"));
    }
    let subject = input.subject.trim().to_string();
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(ServiceError::Validation(format!(
            "Subject must be at most {} characters",
            MAX_SUBJECT_LEN
        )));
    }
    let message = input.message.trim().to_string();
    if message.is_empty() || message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ServiceError::Validation(format!(
            "Message is required and must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    Ok(CreateContactInput {
        name,
        email,
        phone: input.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        subject: if subject.is_empty() {
            "General inquiry".to_string()
        } else {
            subject
        },
        message,
    })
}

fn parse_status(s: &str) -> ServiceResult<ContactStatus> {
    s.parse::<ContactStatus>()
        .map_err(|_| ServiceError::Validation(format!("Unknown message status '{}'", s)))
}

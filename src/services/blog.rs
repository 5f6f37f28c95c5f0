//! Blog service
//!
//! Posts move from draft to published once; `published_at` is set on the
//! first publish and never rewritten. Publishing mails every blog
//! subscriber from a background task.

use chrono::Utc;
use std::sync::Arc;

use crate::db::repositories::{BlogRepository, PostQuery};
use crate::models::{
    BlogComment, BlogPost, BlogPostInput, BlogSubscriber, CommentStatus, CreateCommentInput,
    ListParams, PagedResult, PostStatus,
};
use crate::services::email::EmailService;
use crate::services::error::{is_valid_email, slugify, ServiceError, ServiceResult};

const MAX_TITLE_LEN: usize = 200;
const MAX_COMMENT_LEN: usize = 2000;
const MAX_AUTHOR_LEN: usize = 100;

const SLUG_CONFLICT: &str = "A post with this slug already exists";

pub struct BlogService {
    repo: Arc<dyn BlogRepository>,
    email: Arc<EmailService>,
}

impl BlogService {
    pub fn new(repo: Arc<dyn BlogRepository>, email: Arc<EmailService>) -> Self {
        Self { repo, email }
    }

    /// Published posts, newest first
    pub async fn list_published(
        &self,
        search: Option<String>,
        tag: Option<String>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<BlogPost>> {
        let query = PostQuery {
            published_only: true,
            search: search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            tag: tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        };
        let (posts, total) = self.repo.list_posts(&query, params).await?;
        Ok(PagedResult::new(posts, total, params))
    }

    /// Every post regardless of status
    pub async fn list_all(
        &self,
        search: Option<String>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<BlogPost>> {
        let query = PostQuery {
            published_only: false,
            search: search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            tag: None,
        };
        let (posts, total) = self.repo.list_posts(&query, params).await?;
        Ok(PagedResult::new(posts, total, params))
    }

    /// A published post by slug; counts the view
    pub async fn view(&self, slug: &str) -> ServiceResult<BlogPost> {
        let mut post = self.published_by_slug(slug).await?;
        self.repo.increment_views(post.id).await?;
        post.view_count += 1;
        Ok(post)
    }

    pub async fn get(&self, id: i64) -> ServiceResult<BlogPost> {
        self.repo
            .get_post(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Post"))
    }

    pub async fn create(&self, author_id: i64, input: BlogPostInput) -> ServiceResult<BlogPost> {
        let title = required(input.title, "Title")?;
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ServiceError::Validation(format!(
                "Title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }
        let content = required(input.content, "Content")?;
        let slug = resolve_slug(input.slug.as_deref(), &title)?;
        let status = input.status.unwrap_or(PostStatus::Draft);
        let now = Utc::now();

        let post = BlogPost {
            id: 0,
            slug,
            excerpt: input
                .excerpt
                .map(|e| e.trim().to_string())
                .unwrap_or_else(|| excerpt_from(&content)),
            title,
            content,
            cover_image: input.cover_image.filter(|c| !c.trim().is_empty()),
            author_id: Some(author_id),
            status,
            tags: clean_tags(input.tags.unwrap_or_default()),
            published_at: (status == PostStatus::Published).then_some(now),
            view_count: 0,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .repo
            .create_post(&post)
            .await
            .map_err(|e| ServiceError::from_write(e, SLUG_CONFLICT))?;
        tracing::info!(post_id = created.id, slug = %created.slug, status = %created.status, "Blog post created");

        if created.is_published() {
            self.notify_subscribers(&created);
        }
        Ok(created)
    }

    /// Partial update. A first transition into published stamps
    /// `published_at` and notifies subscribers.
    pub async fn update(&self, id: i64, input: BlogPostInput) -> ServiceResult<BlogPost> {
        let mut post = self.get(id).await?;
        let was_published = post.published_at.is_some();

        if let Some(title) = input.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(ServiceError::validation("Title cannot be empty"));
            }
            if title.chars().count() > MAX_TITLE_LEN {
                return Err(ServiceError::Validation(format!(
                    "Title must be at most {} characters",
                    MAX_TITLE_LEN
                )));
            }
            post.title = title.to_string();
        }
        if let Some(slug) = input.slug.as_deref() {
            post.slug = resolve_slug(Some(slug), &post.title)?;
        }
        if let Some(content) = input.content {
            if content.trim().is_empty() {
                return Err(ServiceError::validation("Content cannot be empty"));
            }
            post.content = content;
        }
        if let Some(excerpt) = input.excerpt {
            post.excerpt = excerpt.trim().to_string();
        }
        if let Some(cover) = input.cover_image {
            post.cover_image = Some(cover).filter(|c| !c.trim().is_empty());
        }
        if let Some(tags) = input.tags {
            post.tags = clean_tags(tags);
        }
        if let Some(status) = input.status {
            post.status = status;
        }
        if post.is_published() && post.published_at.is_none() {
            post.published_at = Some(Utc::now());
        }

        let updated = self
            .repo
            .update_post(&post)
            .await
            .map_err(|e| ServiceError::from_write(e, SLUG_CONFLICT))?;

        if updated.is_published() && !was_published {
            tracing::info!(post_id = updated.id, slug = %updated.slug, "Blog post published");
            self.notify_subscribers(&updated);
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.repo.delete_post(id).await? {
            return Err(ServiceError::not_found("Post"));
        }
        tracing::info!(post_id = id, "Blog post deleted");
        Ok(())
    }

    /// Approved comments of a published post
    pub async fn comments(&self, slug: &str) -> ServiceResult<Vec<BlogComment>> {
        let post = self.published_by_slug(slug).await?;
        Ok(self
            .repo
            .list_post_comments(post.id, Some(CommentStatus::Approved))
            .await?)
    }

    /// New comments wait for moderation
    pub async fn add_comment(&self, slug: &str, input: CreateCommentInput) -> ServiceResult<BlogComment> {
        let post = self.published_by_slug(slug).await?;

        let name = input.author_name.trim();
        let email = input.author_email.trim().to_lowercase();
        let content = input.content.trim();
        if name.is_empty() || name.chars().count() > MAX_AUTHOR_LEN {
            return Err(ServiceError::Validation(format!(
                "Name is required and must be at most {} characters",
                MAX_AUTHOR_LEN
            )));
        }
        if !is_valid_email(&email) {
            return Err(ServiceError::validation("A valid email address is required"));
        }
        if content.is_empty() || content.chars().count() > MAX_COMMENT_LEN {
            return Err(ServiceError::Validation(format!(
                "Comment is required and must be at most {} characters",
                MAX_COMMENT_LEN
            )));
        }

        let comment = self.repo.create_comment(post.id, name, &email, content).await?;
        tracing::info!(comment_id = comment.id, post_id = post.id, "Blog comment awaiting moderation");
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        status: Option<&str>,
        params: &ListParams,
    ) -> ServiceResult<PagedResult<BlogComment>> {
        let status = match status.map(str::trim).filter(|s| !s.is_empty() && *s != "all") {
            Some(s) => Some(parse_comment_status(s)?),
            None => None,
        };
        let (items, total) = self.repo.list_comments(status, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn update_comment_status(&self, id: i64, status: &str) -> ServiceResult<()> {
        let status = parse_comment_status(status)?;
        if !self.repo.update_comment_status(id, status).await? {
            return Err(ServiceError::not_found("Comment"));
        }
        Ok(())
    }

    pub async fn delete_comment(&self, id: i64) -> ServiceResult<()> {
        if !self.repo.delete_comment(id).await? {
            return Err(ServiceError::not_found("Comment"));
        }
        Ok(())
    }

    /// Idempotent; returns true when the address is new
    pub async fn subscribe(&self, email: &str) -> ServiceResult<bool> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::validation("A valid email address is required"));
        }
        let added = self.repo.add_subscriber(&email).await?;
        if added {
            tracing::info!("New blog subscriber");
        }
        Ok(added)
    }

    pub async fn list_subscribers(&self, params: &ListParams) -> ServiceResult<PagedResult<BlogSubscriber>> {
        let (items, total) = self.repo.list_subscribers(params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn published_by_slug(&self, slug: &str) -> ServiceResult<BlogPost> {
        match self.repo.get_post_by_slug(slug.trim()).await? {
            Some(post) if post.is_published() => Ok(post),
            _ => Err(ServiceError::not_found("Post")),
        }
    }

    fn notify_subscribers(&self, post: &BlogPost) {
        let repo = self.repo.clone();
        let email = self.email.clone();
        let post = post.clone();
        tokio::spawn(async move {
            let recipients = match repo.subscriber_emails().await {
                Ok(recipients) => recipients,
                Err(e) => {
                    tracing::warn!(post_id = post.id, "Failed to load blog subscribers: {:#}", e);
                    return;
                }
            };
            let mut failed = 0usize;
            for to in &recipients {
                if let Err(e) = email.send(email.blog_post_published(to, &post)).await {
                    failed += 1;
                    tracing::debug!(post_id = post.id, "Subscriber notification failed: {:#}", e);
                }
            }
            tracing::info!(
                post_id = post.id,
                recipients = recipients.len(),
                failed,
                "Blog subscribers notified"
            );
        });
    }
}

fn required(value: Option<String>, field: &str) -> ServiceResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Validation(format!("{} is required", field)))
}

fn resolve_slug(requested: Option<&str>, title: &str) -> ServiceResult<String> {
    let slug = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(title),
    };
    if slug.is_empty() {
        return Err(ServiceError::validation("Slug must contain letters or digits"));
    }
    Ok(slug)
}

/// First 200 characters of the content, cut at a word boundary
fn excerpt_from(content: &str) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 200 {
        return flat;
    }
    let cut: String = flat.chars().take(200).collect();
    match cut.rfind(' ') {
        Some(pos) => format!("{}...", &cut[..pos]),
        None => format!("{}...", cut),
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn parse_comment_status(s: &str) -> ServiceResult<CommentStatus> {
    s.parse::<CommentStatus>()
        .map_err(|_| ServiceError::Validation(format!("Unknown comment status '{}'", s)))
}

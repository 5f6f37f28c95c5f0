//! Blog repository
//!
//! Posts, reader comments and blog subscribers.

use crate::db::DynDatabasePool;
use crate::models::{BlogComment, BlogPost, BlogSubscriber, CommentStatus, ListParams, PostStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;

/// Listing options for posts
#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub published_only: bool,
    /// Substring over title, excerpt and content
    pub search: Option<String>,
    pub tag: Option<String>,
}

#[async_trait]
pub trait BlogRepository: Send + Sync {
    async fn create_post(&self, post: &BlogPost) -> Result<BlogPost>;

    async fn update_post(&self, post: &BlogPost) -> Result<BlogPost>;

    async fn get_post(&self, id: i64) -> Result<Option<BlogPost>>;

    async fn get_post_by_slug(&self, slug: &str) -> Result<Option<BlogPost>>;

    async fn list_posts(&self, query: &PostQuery, params: &ListParams) -> Result<(Vec<BlogPost>, i64)>;

    async fn delete_post(&self, id: i64) -> Result<bool>;

    async fn increment_views(&self, id: i64) -> Result<()>;

    async fn create_comment(
        &self,
        post_id: i64,
        author_name: &str,
        author_email: &str,
        content: &str,
    ) -> Result<BlogComment>;

    /// Comments of one post, oldest first
    async fn list_post_comments(
        &self,
        post_id: i64,
        status: Option<CommentStatus>,
    ) -> Result<Vec<BlogComment>>;

    async fn list_comments(
        &self,
        status: Option<CommentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<BlogComment>, i64)>;

    async fn update_comment_status(&self, id: i64, status: CommentStatus) -> Result<bool>;

    async fn delete_comment(&self, id: i64) -> Result<bool>;

    /// Returns false when the address was already subscribed
    async fn add_subscriber(&self, email: &str) -> Result<bool>;

    async fn list_subscribers(&self, params: &ListParams) -> Result<(Vec<BlogSubscriber>, i64)>;

    async fn subscriber_emails(&self) -> Result<Vec<String>>;
}

pub struct SqlxBlogRepository {
    pool: DynDatabasePool,
}

impl SqlxBlogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BlogRepository> {
        Arc::new(Self::new(pool))
    }
}

const POST_COLUMNS: &str = r#"
    id, slug, title, excerpt, content, cover_image, author_id, status, tags,
    published_at, view_count, created_at, updated_at
"#;

const COMMENT_COLUMNS: &str = "id, post_id, author_name, author_email, content, status, created_at";

#[async_trait]
impl BlogRepository for SqlxBlogRepository {
    async fn create_post(&self, post: &BlogPost) -> Result<BlogPost> {
        let pool = self.pool.sqlite();
        let result = sqlx::query(
            r#"
            INSERT INTO blog_posts (slug, title, excerpt, content, cover_image, author_id, status, tags, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.slug)
        .bind(&post.title)
        .bind(&post.excerpt)
        .bind(&post.content)
        .bind(&post.cover_image)
        .bind(post.author_id)
        .bind(post.status.as_str())
        .bind(serde_json::to_string(&post.tags)?)
        .bind(post.published_at)
        .execute(pool)
        .await
        .context("Failed to create blog post")?;

        get_post(pool, result.last_insert_rowid())
            .await?
            .context("Post not found after insert")
    }

    async fn update_post(&self, post: &BlogPost) -> Result<BlogPost> {
        let pool = self.pool.sqlite();
        sqlx::query(
            r#"
            UPDATE blog_posts SET
                slug = ?, title = ?, excerpt = ?, content = ?, cover_image = ?, status = ?,
                tags = ?, published_at = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&post.slug)
        .bind(&post.title)
        .bind(&post.excerpt)
        .bind(&post.content)
        .bind(&post.cover_image)
        .bind(post.status.as_str())
        .bind(serde_json::to_string(&post.tags)?)
        .bind(post.published_at)
        .bind(post.id)
        .execute(pool)
        .await
        .context("Failed to update blog post")?;

        get_post(pool, post.id)
            .await?
            .context("Post not found after update")
    }

    async fn get_post(&self, id: i64) -> Result<Option<BlogPost>> {
        get_post(self.pool.sqlite(), id).await
    }

    async fn get_post_by_slug(&self, slug: &str) -> Result<Option<BlogPost>> {
        let row = sqlx::query(&format!("SELECT {} FROM blog_posts WHERE slug = ?", POST_COLUMNS))
            .bind(slug)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get blog post by slug")?;
        row.as_ref().map(row_to_post).transpose()
    }

    async fn list_posts(&self, query: &PostQuery, params: &ListParams) -> Result<(Vec<BlogPost>, i64)> {
        let pool = self.pool.sqlite();

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM blog_posts");
        push_post_conditions(&mut count_qb, query);
        let total: i64 = count_qb
            .build()
            .fetch_one(pool)
            .await
            .context("Failed to count blog posts")?
            .get("count");

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM blog_posts", POST_COLUMNS));
        push_post_conditions(&mut qb, query);
        qb.push(" ORDER BY COALESCE(published_at, created_at) DESC, id DESC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());

        let rows = qb
            .build()
            .fetch_all(pool)
            .await
            .context("Failed to list blog posts")?;
        let posts = rows.iter().map(row_to_post).collect::<Result<Vec<_>>>()?;
        Ok((posts, total))
    }

    async fn delete_post(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blog_posts WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete blog post")?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_views(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE blog_posts SET view_count = view_count + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to increment view count")?;
        Ok(())
    }

    async fn create_comment(
        &self,
        post_id: i64,
        author_name: &str,
        author_email: &str,
        content: &str,
    ) -> Result<BlogComment> {
        let pool = self.pool.sqlite();
        let result = sqlx::query(
            "INSERT INTO blog_comments (post_id, author_name, author_email, content) VALUES (?, ?, ?, ?)",
        )
        .bind(post_id)
        .bind(author_name)
        .bind(author_email)
        .bind(content)
        .execute(pool)
        .await
        .context("Failed to create comment")?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM blog_comments WHERE id = ?",
            COMMENT_COLUMNS
        ))
        .bind(result.last_insert_rowid())
        .fetch_one(pool)
        .await
        .context("Comment not found after insert")?;
        row_to_comment(&row)
    }

    async fn list_post_comments(
        &self,
        post_id: i64,
        status: Option<CommentStatus>,
    ) -> Result<Vec<BlogComment>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM blog_comments WHERE post_id = ",
            COMMENT_COLUMNS
        ));
        qb.push_bind(post_id);
        if let Some(status) = status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at, id");

        let rows = qb
            .build()
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to list comments")?;
        rows.iter().map(row_to_comment).collect()
    }

    async fn list_comments(
        &self,
        status: Option<CommentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<BlogComment>, i64)> {
        let pool = self.pool.sqlite();

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS count FROM blog_comments WHERE 1 = 1");
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM blog_comments WHERE 1 = 1",
            COMMENT_COLUMNS
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
            .context("Failed to list comments")?;
        let comments = rows.iter().map(row_to_comment).collect::<Result<Vec<_>>>()?;
        Ok((comments, total))
    }

    async fn update_comment_status(&self, id: i64, status: CommentStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE blog_comments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to update comment status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_comment(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blog_comments WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete comment")?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_subscriber(&self, email: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO blog_subscribers (email) VALUES (?)")
            .bind(email)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to add blog subscriber")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscribers(&self, params: &ListParams) -> Result<(Vec<BlogSubscriber>, i64)> {
        let pool = self.pool.sqlite();
        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM blog_subscribers")
            .fetch_one(pool)
            .await?
            .get("count");
        let rows = sqlx::query(
            "SELECT id, email, created_at FROM blog_subscribers ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list blog subscribers")?;

        let subscribers = rows
            .iter()
            .map(|r| BlogSubscriber {
                id: r.get("id"),
                email: r.get("email"),
                created_at: r.get("created_at"),
            })
            .collect();
        Ok((subscribers, total))
    }

    async fn subscriber_emails(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT email FROM blog_subscribers ORDER BY id")
            .fetch_all(self.pool.sqlite())
            .await
            .context("Failed to load blog subscribers")?;
        Ok(rows.iter().map(|r| r.get("email")).collect())
    }
}

async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<BlogPost>> {
    let row = sqlx::query(&format!("SELECT {} FROM blog_posts WHERE id = ?", POST_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get blog post")?;
    row.as_ref().map(row_to_post).transpose()
}

fn push_post_conditions(qb: &mut QueryBuilder<'_, Sqlite>, query: &PostQuery) {
    qb.push(" WHERE 1 = 1");
    if query.published_only {
        qb.push(" AND status = 'published'");
    }
    if let Some(search) = &query.search {
        let pattern = format!("%{}%", search.to_lowercase());
        qb.push(" AND (LOWER(title) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(excerpt) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(content) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(tag) = &query.tag {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(blog_posts.tags) WHERE LOWER(json_each.value) = LOWER(")
            .push_bind(tag.clone())
            .push("))");
    }
}

fn row_to_post(row: &SqliteRow) -> Result<BlogPost> {
    let status: String = row.get("status");
    let tags: String = row.get("tags");
    Ok(BlogPost {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        content: row.get("content"),
        cover_image: row.get("cover_image"),
        author_id: row.get("author_id"),
        status: status.parse::<PostStatus>()?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        published_at: row.get("published_at"),
        view_count: row.get("view_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_comment(row: &SqliteRow) -> Result<BlogComment> {
    let status: String = row.get("status");
    Ok(BlogComment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        author_name: row.get("author_name"),
        author_email: row.get("author_email"),
        content: row.get("content"),
        status: status.parse()?,
        created_at: row.get("created_at"),
    })
}

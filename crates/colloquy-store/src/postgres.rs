//! PostgreSQL backend.
//!
//! Uses keyset pagination over a composite `(post_id, created_at, id)` index
//! so a page request costs the same regardless of how deep into a thread it
//! starts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use colloquy_types::{Comment, CommentDraft, CommentId, Post, PostId};

use crate::error::{EntityKind, StoreError, StoreResult};
use crate::page::{CommentPage, PageRequest};
use crate::traits::Store;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        author TEXT NOT NULL,
        comments_closed BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id UUID PRIMARY KEY,
        post_id UUID NOT NULL REFERENCES posts(id),
        parent_id UUID REFERENCES comments(id),
        author TEXT NOT NULL,
        body TEXT NOT NULL,
        depth INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS comments_post_keyset ON comments (post_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS comments_parent_keyset ON comments (parent_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS posts_created ON posts (created_at DESC, id DESC)",
];

const POST_COLUMNS: &str = "id, title, body, author, comments_closed, created_at";
const COMMENT_COLUMNS: &str = "id, post_id, parent_id, author, body, depth, created_at";

/// PostgreSQL-backed [`Store`].
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a bounded pool.
    pub async fn connect(dsn: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(dsn)
            .await?;
        info!(max_connections, "connected to postgres");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = MIGRATIONS.len(), "schema up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Build the keyset query for a comment page.
///
/// Bind order: `post_id`, then `parent_id` if filtered, then the cursor's
/// `created_at` and `id` if present, then the row limit.
fn keyset_query(has_parent: bool, has_after: bool) -> String {
    let mut sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1");
    let mut next = 2;
    if has_parent {
        sql.push_str(&format!(" AND parent_id = ${next}"));
        next += 1;
    }
    if has_after {
        sql.push_str(&format!(" AND (created_at, id) > (${}, ${})", next, next + 1));
        next += 2;
    }
    sql.push_str(&format!(" ORDER BY created_at ASC, id ASC LIMIT ${next}"));
    sql
}

fn row_to_post(row: &PgRow) -> StoreResult<Post> {
    Ok(Post {
        id: PostId::from_uuid(row.try_get("id")?),
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        author: row.try_get("author")?,
        comments_closed: row.try_get("comments_closed")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_comment(row: &PgRow) -> StoreResult<Comment> {
    let parent: Option<Uuid> = row.try_get("parent_id")?;
    let depth: i32 = row.try_get("depth")?;
    Ok(Comment {
        id: CommentId::from_uuid(row.try_get("id")?),
        post_id: PostId::from_uuid(row.try_get("post_id")?),
        parent_id: parent.map(CommentId::from_uuid),
        author: row.try_get("author")?,
        body: row.try_get("body")?,
        depth: u32::try_from(depth)
            .map_err(|_| StoreError::Backend(format!("negative comment depth {depth}")))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_post(&self, post: Post) -> StoreResult<Post> {
        sqlx::query(
            "INSERT INTO posts (id, title, body, author, comments_closed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*post.id.as_uuid())
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.author)
        .bind(post.comments_closed)
        .bind(post.created_at)
        .execute(&self.pool)
        .await?;
        Ok(post)
    }

    async fn get_post(&self, id: PostId) -> StoreResult<Post> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::Post, id))?;
        row_to_post(&row)
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_post).collect()
    }

    async fn set_comments_closed(&self, id: PostId, closed: bool) -> StoreResult<Post> {
        let sql = format!(
            "UPDATE posts SET comments_closed = $2 WHERE id = $1 RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .bind(closed)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::Post, id))?;
        row_to_post(&row)
    }

    async fn create_comment(&self, draft: CommentDraft) -> StoreResult<Comment> {
        let mut tx = self.pool.begin().await?;

        // Row lock so a concurrent close cannot slip in before the insert.
        let closed: Option<bool> =
            sqlx::query_scalar("SELECT comments_closed FROM posts WHERE id = $1 FOR UPDATE")
                .bind(*draft.post_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        match closed {
            None => return Err(StoreError::not_found(EntityKind::Post, draft.post_id)),
            Some(true) => return Err(StoreError::comments_closed(draft.post_id)),
            Some(false) => {}
        }

        let depth = match draft.parent_id {
            Some(parent_id) => {
                let parent_depth: Option<i32> =
                    sqlx::query_scalar("SELECT depth FROM comments WHERE id = $1")
                        .bind(*parent_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await?;
                let parent_depth = parent_depth
                    .ok_or_else(|| StoreError::not_found(EntityKind::Comment, parent_id))?;
                u32::try_from(parent_depth).unwrap_or(0) + 1
            }
            None => 0,
        };

        let comment = draft.into_comment(depth);
        sqlx::query(
            "INSERT INTO comments (id, post_id, parent_id, author, body, depth, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*comment.id.as_uuid())
        .bind(*comment.post_id.as_uuid())
        .bind(comment.parent_id.map(|p| *p.as_uuid()))
        .bind(&comment.author)
        .bind(&comment.body)
        .bind(i32::try_from(comment.depth).unwrap_or(i32::MAX))
        .bind(comment.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(comment)
    }

    async fn get_comment(&self, id: CommentId) -> StoreResult<Comment> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::Comment, id))?;
        row_to_comment(&row)
    }

    async fn list_comments(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        page: &PageRequest,
    ) -> StoreResult<CommentPage> {
        let sql = keyset_query(parent_id.is_some(), page.after().is_some());
        let mut query = sqlx::query(&sql).bind(*post_id.as_uuid());
        if let Some(parent) = parent_id {
            query = query.bind(*parent.as_uuid());
        }
        if let Some(after) = page.after() {
            query = query.bind(after.created_at).bind(*after.id.as_uuid());
        }
        let rows = query
            .bind(i64::try_from(page.fetch_limit()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let comments = rows
            .iter()
            .map(row_to_comment)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(CommentPage::from_rows(comments, page))
    }

    async fn batch_comments_count(&self, post_ids: &[PostId]) -> StoreResult<HashMap<PostId, u64>> {
        let mut counts: HashMap<PostId, u64> = post_ids.iter().map(|id| (*id, 0)).collect();
        if post_ids.is_empty() {
            return Ok(counts);
        }

        let uuids: Vec<Uuid> = post_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT post_id, COUNT(*) AS n FROM comments WHERE post_id = ANY($1) GROUP BY post_id",
        )
        .bind(uuids)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let post_id = PostId::from_uuid(row.try_get("post_id")?);
            let n: i64 = row.try_get("n")?;
            counts.insert(post_id, n.max(0) as u64);
        }
        debug!(keys = post_ids.len(), "batched comment counts");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_of_whole_post() {
        assert_eq!(
            keyset_query(false, false),
            format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 \
                 ORDER BY created_at ASC, id ASC LIMIT $2"
            )
        );
    }

    #[test]
    fn cursor_and_parent_placeholders_are_sequential() {
        let sql = keyset_query(true, true);
        assert!(sql.contains("parent_id = $2"));
        assert!(sql.contains("(created_at, id) > ($3, $4)"));
        assert!(sql.ends_with("LIMIT $5"));
    }

    #[test]
    fn cursor_without_parent() {
        let sql = keyset_query(false, true);
        assert!(!sql.contains("parent_id"));
        assert!(sql.contains("(created_at, id) > ($2, $3)"));
        assert!(sql.ends_with("LIMIT $4"));
    }
}

//! In-memory store for tests and single-node deployments.
//!
//! [`InMemoryStore`] keeps posts and comments in `HashMap`s behind a single
//! `RwLock`. Each post's comments are additionally kept in a vector sorted by
//! pagination key, so a page request seeks with a binary search instead of
//! scanning from the start.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use colloquy_types::{Comment, CommentDraft, CommentId, Post, PostId};

use crate::cursor::CursorKey;
use crate::error::{EntityKind, StoreError, StoreResult};
use crate::page::{CommentPage, PageRequest};
use crate::traits::Store;

/// An in-memory implementation of [`Store`]. Data is lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    posts: HashMap<PostId, Post>,
    comments: HashMap<CommentId, Comment>,
    /// Per-post comments, sorted by `(created_at, id)`.
    threads: HashMap<PostId, Vec<Comment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_post(&self, post: Post) -> StoreResult<Post> {
        let mut state = self.write()?;
        state.posts.insert(post.id, post.clone());
        debug!(post_id = %post.id, "post stored");
        Ok(post)
    }

    async fn get_post(&self, id: PostId) -> StoreResult<Post> {
        let state = self.read()?;
        state
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Post, id))
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        let state = self.read()?;
        let mut posts: Vec<Post> = state.posts.values().cloned().collect();
        posts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(posts)
    }

    async fn set_comments_closed(&self, id: PostId, closed: bool) -> StoreResult<Post> {
        let mut state = self.write()?;
        let post = state
            .posts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Post, id))?;
        post.comments_closed = closed;
        Ok(post.clone())
    }

    async fn create_comment(&self, draft: CommentDraft) -> StoreResult<Comment> {
        let mut state = self.write()?;
        let post = state
            .posts
            .get(&draft.post_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Post, draft.post_id))?;
        if post.comments_closed {
            return Err(StoreError::comments_closed(draft.post_id));
        }

        let depth = match draft.parent_id {
            Some(parent_id) => {
                let parent = state
                    .comments
                    .get(&parent_id)
                    .ok_or_else(|| StoreError::not_found(EntityKind::Comment, parent_id))?;
                parent.depth + 1
            }
            None => 0,
        };

        let comment = draft.into_comment(depth);
        let key = CursorKey::of(&comment);
        let thread = state.threads.entry(comment.post_id).or_default();
        // Mostly appends; out-of-order timestamps still land in key order.
        let at = thread.partition_point(|c| CursorKey::of(c) < key);
        thread.insert(at, comment.clone());
        state.comments.insert(comment.id, comment.clone());

        debug!(comment_id = %comment.id, post_id = %comment.post_id, depth, "comment stored");
        Ok(comment)
    }

    async fn get_comment(&self, id: CommentId) -> StoreResult<Comment> {
        let state = self.read()?;
        state
            .comments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Comment, id))
    }

    async fn list_comments(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        page: &PageRequest,
    ) -> StoreResult<CommentPage> {
        let state = self.read()?;
        let thread = match state.threads.get(&post_id) {
            Some(thread) => thread.as_slice(),
            None => &[],
        };

        let start = match page.after() {
            Some(after) => thread.partition_point(|c| CursorKey::of(c) <= *after),
            None => 0,
        };

        let rows: Vec<Comment> = thread[start..]
            .iter()
            .filter(|c| parent_id.is_none() || c.parent_id == parent_id)
            .take(page.fetch_limit())
            .cloned()
            .collect();

        Ok(CommentPage::from_rows(rows, page))
    }

    async fn batch_comments_count(&self, post_ids: &[PostId]) -> StoreResult<HashMap<PostId, u64>> {
        let state = self.read()?;
        let counts = post_ids
            .iter()
            .map(|id| {
                let count = state.threads.get(id).map_or(0, |t| t.len() as u64);
                (*id, count)
            })
            .collect();
        Ok(counts)
    }
}

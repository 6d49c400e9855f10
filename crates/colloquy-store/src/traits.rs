//! The [`Store`] trait defining the persistence interface.

use std::collections::HashMap;

use async_trait::async_trait;

use colloquy_types::{Comment, CommentDraft, CommentId, Post, PostId};

use crate::error::StoreResult;
use crate::page::{CommentPage, PageRequest};

/// Storage backend for posts and comments.
///
/// Implementations must be thread-safe and tolerate concurrent calls from
/// independent operations. All of them must satisfy:
///
/// - Lookups of a missing record fail with [`StoreError::NotFound`].
/// - Comments are append-only; `create_comment` computes the depth from the
///   parent once and never revises it.
/// - `list_comments` implements the keyset pagination rules documented at
///   the crate root, byte-for-byte identically across backends.
/// - `batch_comments_count` answers every requested id, zero included.
///
/// [`StoreError::NotFound`]: crate::error::StoreError::NotFound
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_post(&self, post: Post) -> StoreResult<Post>;

    async fn get_post(&self, id: PostId) -> StoreResult<Post>;

    /// All posts, newest first.
    async fn list_posts(&self) -> StoreResult<Vec<Post>>;

    /// Set the comments-closed flag and return the updated post.
    async fn set_comments_closed(&self, id: PostId, closed: bool) -> StoreResult<Post>;

    /// Persist a comment draft.
    ///
    /// Fails with `NotFound` if the post or the named parent is missing, and
    /// with `CommentsClosed` if the post's flag is set at write time.
    async fn create_comment(&self, draft: CommentDraft) -> StoreResult<Comment>;

    async fn get_comment(&self, id: CommentId) -> StoreResult<Comment>;

    /// One page of a post's comments.
    ///
    /// With `parent_id` set, only direct children of that comment qualify;
    /// otherwise every comment of the post does.
    async fn list_comments(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        page: &PageRequest,
    ) -> StoreResult<CommentPage>;

    /// Comment counts for a set of posts in a single round-trip.
    async fn batch_comments_count(&self, post_ids: &[PostId]) -> StoreResult<HashMap<PostId, u64>>;
}

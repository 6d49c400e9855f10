use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use colloquy_bus::{FanoutBus, Subscription};
use colloquy_loader::LoaderConfig;
use colloquy_store::{CommentPage, InMemoryStore, PageRequest, Store, StoreError};
use colloquy_types::{
    Comment, CommentBody, CommentDraft, CommentId, NewPost, Post, PostId, PostView,
};

use crate::error::{ServiceError, ServiceResult};
use crate::scope::OperationScope;

/// Fan-out of newly stored comments, keyed by post.
pub type CommentBus = FanoutBus<PostId, Comment>;

/// Unvalidated input for adding a comment.
#[derive(Clone, Debug)]
pub struct NewComment {
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub author: String,
    pub body: String,
}

/// Post and comment operations.
///
/// Cheap to clone; clones share the store and the bus.
#[derive(Clone)]
pub struct Discussion {
    store: Arc<dyn Store>,
    bus: CommentBus,
    loader_config: LoaderConfig,
}

impl Discussion {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_parts(store, CommentBus::new(), LoaderConfig::default())
    }

    /// A service over an empty in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn with_parts(store: Arc<dyn Store>, bus: CommentBus, loader_config: LoaderConfig) -> Self {
        Self {
            store,
            bus,
            loader_config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn bus(&self) -> &CommentBus {
        &self.bus
    }

    /// Start an operation. Pass the scope to every read of that operation
    /// and drop it when the operation ends.
    pub fn begin_operation(&self) -> OperationScope {
        OperationScope::new(Arc::clone(&self.store), self.loader_config)
    }

    async fn view(&self, scope: &OperationScope, post: Post) -> ServiceResult<PostView> {
        let comments_count = scope.comments_count(post.id).await?;
        Ok(PostView {
            post,
            comments_count,
        })
    }

    // ---- Posts ----

    pub async fn create_post(&self, input: NewPost) -> ServiceResult<PostView> {
        let post = Post::create(input)?;
        let post = self.store.create_post(post).await.map_err(store_err)?;
        info!(post_id = %post.id, author = %post.author, "post created");
        Ok(PostView {
            post,
            comments_count: 0,
        })
    }

    pub async fn get_post(&self, scope: &OperationScope, id: PostId) -> ServiceResult<PostView> {
        let post = self.store.get_post(id).await.map_err(store_err)?;
        self.view(scope, post).await
    }

    /// Every post, newest first. The counts are resolved concurrently and
    /// land in one batched store call.
    pub async fn list_posts(&self, scope: &OperationScope) -> ServiceResult<Vec<PostView>> {
        let posts = self.store.list_posts().await.map_err(store_err)?;
        debug!(operation = %scope.id(), posts = posts.len(), "listing posts");
        try_join_all(posts.into_iter().map(|post| self.view(scope, post))).await
    }

    pub async fn set_comments_closed(
        &self,
        scope: &OperationScope,
        id: PostId,
        closed: bool,
    ) -> ServiceResult<PostView> {
        let post = self
            .store
            .set_comments_closed(id, closed)
            .await
            .map_err(store_err)?;
        info!(post_id = %id, closed, "comments flag changed");
        self.view(scope, post).await
    }

    // ---- Comments ----

    /// Validate, persist, and then publish a new comment.
    pub async fn add_comment(&self, input: NewComment) -> ServiceResult<Comment> {
        let body = CommentBody::parse(input.body)?;

        let post = self.store.get_post(input.post_id).await.map_err(store_err)?;
        if post.comments_closed {
            return Err(ServiceError::Forbidden(
                "comments are closed for this post".into(),
            ));
        }

        if let Some(parent_id) = input.parent_id {
            let parent = match self.store.get_comment(parent_id).await {
                Ok(parent) => parent,
                Err(StoreError::NotFound { .. }) => {
                    return Err(ServiceError::Validation(format!("invalid parent {parent_id}")))
                }
                Err(err) => return Err(store_err(err)),
            };
            if parent.post_id != post.id {
                return Err(ServiceError::Validation(
                    "parent comment belongs to another post".into(),
                ));
            }
        }

        let draft = CommentDraft::new(post.id, input.parent_id, &input.author, body);
        let comment = self.store.create_comment(draft).await.map_err(store_err)?;

        let deliveries = self.bus.publish(&comment.post_id, comment.clone());
        info!(
            comment_id = %comment.id,
            post_id = %comment.post_id,
            depth = comment.depth,
            deliveries,
            "comment added"
        );
        Ok(comment)
    }

    pub async fn get_comment(&self, id: CommentId) -> ServiceResult<Comment> {
        self.store.get_comment(id).await.map_err(store_err)
    }

    /// One page of a post's comments.
    ///
    /// `after` is the opaque end cursor of a previous page; `limit` defaults
    /// to 20 and must be positive. With `parent_id`, only that comment's
    /// direct replies are listed.
    pub async fn comments(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        after: Option<&str>,
        limit: Option<i64>,
    ) -> ServiceResult<CommentPage> {
        let request = PageRequest::new(after, limit)?;
        self.store.get_post(post_id).await.map_err(store_err)?;
        self.store
            .list_comments(post_id, parent_id, &request)
            .await
            .map_err(store_err)
    }

    /// Live feed of comments added to `post_id` from now on.
    ///
    /// The feed stays open while the returned [`Subscription`] is held.
    pub async fn subscribe_comments(
        &self,
        post_id: PostId,
        capacity: usize,
    ) -> ServiceResult<(mpsc::Receiver<Comment>, Subscription<PostId, Comment>)> {
        self.store.get_post(post_id).await.map_err(store_err)?;
        let (rx, subscription) = self.bus.subscribe_channel(post_id, capacity)?;
        debug!(%post_id, id = subscription.id(), "live comments subscribed");
        Ok((rx, subscription))
    }
}

/// Convert a store failure, logging detail that the caller will not see.
fn store_err(err: StoreError) -> ServiceError {
    let err = ServiceError::from(err);
    if let ServiceError::Internal(detail) = &err {
        error!(error = %detail, "store failure");
    }
    err
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use colloquy_loader::{BatchFn, BatchLoader, LoaderConfig};
use colloquy_store::{Store, StoreError};
use colloquy_types::PostId;

use crate::error::ServiceResult;

/// Batched comment counts straight from the store.
#[derive(Clone)]
pub struct StoreCountSource {
    store: Arc<dyn Store>,
}

impl StoreCountSource {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchFn<PostId, u64> for StoreCountSource {
    type Error = StoreError;

    async fn load_batch(&self, keys: &[PostId]) -> Result<HashMap<PostId, u64>, StoreError> {
        self.store.batch_comments_count(keys).await
    }
}

pub type CommentsCountLoader = BatchLoader<PostId, u64, StoreCountSource>;

/// The loaders owned by one operation.
pub struct Loaders {
    pub comments_count: CommentsCountLoader,
}

/// Per-operation context handed to every resolver of that operation.
///
/// Owns a fresh set of loaders, so cached counts live exactly as long as the
/// operation. Dropping the scope cancels any load still waiting on it.
pub struct OperationScope {
    id: Uuid,
    loaders: Loaders,
    cancel: CancellationToken,
}

impl OperationScope {
    pub fn new(store: Arc<dyn Store>, config: LoaderConfig) -> Self {
        let id = Uuid::now_v7();
        debug!(operation = %id, "operation started");
        Self {
            id,
            loaders: Loaders {
                comments_count: BatchLoader::with_config(StoreCountSource::new(store), config),
            },
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn loaders(&self) -> &Loaders {
        &self.loaders
    }

    /// Token that fires when the operation is abandoned.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Comment count of one post, batched with every other count requested
    /// during this operation.
    pub async fn comments_count(&self, post_id: PostId) -> ServiceResult<u64> {
        let count = self
            .loaders
            .comments_count
            .load_cancellable(post_id, &self.cancel)
            .await?;
        Ok(count)
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(operation = %self.id, "operation finished");
    }
}

impl std::fmt::Debug for OperationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationScope")
            .field("id", &self.id)
            .field("cached_counts", &self.loaders.comments_count.cached_len())
            .finish()
    }
}

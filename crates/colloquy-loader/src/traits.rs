use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;

/// A batched lookup: resolve many keys in one call.
///
/// Implementations should return an entry for every key they can answer.
/// Keys absent from the returned map resolve to
/// [`LoadError::MissingKey`](crate::LoadError::MissingKey).
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load_batch(&self, keys: &[K]) -> Result<HashMap<K, V>, Self::Error>;
}

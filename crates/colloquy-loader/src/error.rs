use std::sync::Arc;

/// Errors returned to a single `load` caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The caller's cancellation fired before its batch was answered.
    #[error("load cancelled")]
    Cancelled,

    /// The batched lookup failed; every waiter of that batch sees the same error.
    #[error("batch load failed: {0}")]
    Batch(Arc<dyn std::error::Error + Send + Sync>),

    /// The batched lookup succeeded but returned no value for this key.
    #[error("batch result is missing a requested key")]
    MissingKey,

    /// The flush task went away without answering (it panicked or the
    /// runtime is shutting down).
    #[error("batch flush aborted")]
    Aborted,
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result alias for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

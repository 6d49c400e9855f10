use std::fmt;

/// The kind of record a [`StoreError::NotFound`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Post,
    Comment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post => write!(f, "post"),
            Self::Comment => write!(f, "comment"),
        }
    }
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced post or comment does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// The post no longer accepts comments.
    #[error("comments are closed on post {post_id}")]
    CommentsClosed { post_id: String },

    /// Any other failure of the backing engine, passed through as text.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn comments_closed(post_id: impl fmt::Display) -> Self {
        Self::CommentsClosed {
            post_id: post_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Rejections of pagination arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("invalid cursor: {reason}")]
    InvalidCursor { reason: String },

    #[error("invalid limit {0}: must be positive")]
    InvalidLimit(i64),
}

impl PageError {
    pub(crate) fn cursor(reason: impl Into<String>) -> Self {
        Self::InvalidCursor {
            reason: reason.into(),
        }
    }
}

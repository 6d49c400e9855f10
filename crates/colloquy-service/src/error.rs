use colloquy_bus::BusError;
use colloquy_loader::LoadError;
use colloquy_store::{PageError, StoreError};
use colloquy_types::TypeError;

/// The error taxonomy seen by callers of the service.
///
/// Every failure from the layers below is folded into one of these four
/// categories. Only `Internal` carries detail that must not reach clients;
/// use [`public_message`](Self::public_message) when rendering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Message safe to show to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::CommentsClosed { .. } => Self::Forbidden(err.to_string()),
            StoreError::Backend(detail) => Self::Internal(detail),
        }
    }
}

impl From<PageError> for ServiceError {
    fn from(err: PageError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TypeError> for ServiceError {
    fn from(err: TypeError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<LoadError> for ServiceError {
    fn from(err: LoadError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<BusError> for ServiceError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Shutdown => Self::Forbidden("live updates are shutting down".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_store::EntityKind;

    #[test]
    fn codes_cover_the_taxonomy() {
        assert_eq!(ServiceError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(ServiceError::Validation("x".into()).code(), "BAD_REQUEST");
        assert_eq!(ServiceError::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(ServiceError::Internal("x".into()).code(), "INTERNAL");
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = ServiceError::from(StoreError::Backend("connection refused to 10.0.0.3".into()));
        assert_eq!(err.code(), "INTERNAL");
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn store_not_found_stays_not_found() {
        let err = ServiceError::from(StoreError::not_found(EntityKind::Post, "p1"));
        assert_eq!(err, ServiceError::NotFound("post not found: p1".into()));
        assert_eq!(err.public_message(), "post not found: p1");
    }

    #[test]
    fn closed_at_write_is_forbidden() {
        let err = ServiceError::from(StoreError::comments_closed("p1"));
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn bad_input_is_validation() {
        assert_eq!(ServiceError::from(PageError::InvalidLimit(0)).code(), "BAD_REQUEST");
        let err = ServiceError::from(TypeError::EmptyField { field: "body" });
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}

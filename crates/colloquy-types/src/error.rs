use thiserror::Error;

/// Errors produced while constructing or parsing domain types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("{field} is required")]
    EmptyField { field: &'static str },

    #[error("{field} too long: {actual} characters, at most {max} allowed")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("invalid id: {0}")]
    InvalidId(String),
}

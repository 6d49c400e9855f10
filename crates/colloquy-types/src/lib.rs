//! Foundation types for Colloquy.
//!
//! Every other Colloquy crate depends on `colloquy-types`. The crate holds no
//! behaviour beyond construction-time validation.
//!
//! # Key Types
//!
//! - [`PostId`] / [`CommentId`] -- UUID v7 identifiers
//! - [`Post`] / [`PostView`] -- a discussion post and its read model
//! - [`Comment`] -- an append-only node in a post's comment tree
//! - [`CommentDraft`] -- a validated comment waiting for the store to assign depth
//! - [`CommentBody`] / [`PostTitle`] -- validated user input

pub mod comment;
pub mod error;
pub mod ids;
pub mod post;
pub mod time;

pub use comment::{Comment, CommentBody, CommentDraft, MAX_COMMENT_LEN};
pub use error::TypeError;
pub use ids::{CommentId, PostId};
pub use post::{NewPost, Post, PostTitle, PostView, MAX_TITLE_LEN};
pub use time::now_micros;

/// Author name recorded when the caller supplies none.
pub const ANONYMOUS_AUTHOR: &str = "anonymous";

/// Trim an author name, falling back to [`ANONYMOUS_AUTHOR`] when blank.
pub fn normalize_author(author: &str) -> String {
    let trimmed = author.trim();
    if trimmed.is_empty() {
        ANONYMOUS_AUTHOR.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_author_becomes_anonymous() {
        assert_eq!(normalize_author("   "), ANONYMOUS_AUTHOR);
        assert_eq!(normalize_author(""), ANONYMOUS_AUTHOR);
        assert_eq!(normalize_author("  bob "), "bob");
    }
}

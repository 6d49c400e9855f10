//! Discussion service for Colloquy.
//!
//! [`Discussion`] is the operation layer that the HTTP server (or any other
//! front end) calls. It validates input, enforces the closed-comments rule,
//! persists through a [`Store`](colloquy_store::Store), and publishes each
//! new comment on the [`CommentBus`] once it is stored.
//!
//! Reads that need comment counts go through an [`OperationScope`]: one per
//! incoming operation, owning a fresh batching loader so that counts for many
//! posts collapse into a single store call and never leak across operations.

pub mod discussion;
pub mod error;
pub mod scope;

pub use discussion::{CommentBus, Discussion, NewComment};
pub use error::{ServiceError, ServiceResult};
pub use scope::{CommentsCountLoader, Loaders, OperationScope, StoreCountSource};

// Re-export the types callers need to drive the service.
pub use colloquy_loader::LoaderConfig;
pub use colloquy_store::{CommentPage, Cursor, PageInfo};
pub use colloquy_types::{Comment, CommentId, NewPost, Post, PostId, PostView};

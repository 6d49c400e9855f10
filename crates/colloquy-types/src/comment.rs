use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{CommentId, PostId};
use crate::time::now_micros;

/// Maximum length of a comment body, in characters.
pub const MAX_COMMENT_LEN: usize = 2000;

/// A validated comment body: not blank and at most [`MAX_COMMENT_LEN`]
/// characters long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentBody(String);

impl CommentBody {
    pub fn parse(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(TypeError::EmptyField { field: "body" });
        }
        let len = raw.chars().count();
        if len > MAX_COMMENT_LEN {
            return Err(TypeError::TooLong {
                field: "body",
                max: MAX_COMMENT_LEN,
                actual: len,
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A comment in a post's discussion tree.
///
/// Comments are append-only: never re-parented or deleted, so `depth`
/// is fixed at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub author: String,
    pub body: String,
    /// 0 for root comments, parent depth + 1 otherwise.
    pub depth: u32,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Pagination order key: creation time, ties broken by id.
    pub fn sort_key(&self) -> (DateTime<Utc>, CommentId) {
        (self.created_at, self.id)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A validated comment that has not been persisted yet.
///
/// The store resolves the parent and assigns the depth when it turns the
/// draft into a [`Comment`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentDraft {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub author: String,
    pub body: CommentBody,
    pub created_at: DateTime<Utc>,
}

impl CommentDraft {
    pub fn new(
        post_id: PostId,
        parent_id: Option<CommentId>,
        author: &str,
        body: CommentBody,
    ) -> Self {
        Self {
            id: CommentId::new(),
            post_id,
            parent_id,
            author: crate::normalize_author(author),
            body,
            created_at: now_micros(),
        }
    }

    /// Override the creation time (imports, fixtures).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Materialize the draft at the given depth.
    pub fn into_comment(self, depth: u32) -> Comment {
        Comment {
            id: self.id,
            post_id: self.post_id,
            parent_id: self.parent_id,
            author: self.author,
            body: self.body.into_inner(),
            depth,
            created_at: self.created_at,
        }
    }
}

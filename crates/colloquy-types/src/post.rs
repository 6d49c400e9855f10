use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::PostId;
use crate::time::now_micros;

/// Maximum length of a post title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// A validated, non-blank post title.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostTitle(String);

impl PostTitle {
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TypeError::EmptyField { field: "title" });
        }
        let len = trimmed.chars().count();
        if len > MAX_TITLE_LEN {
            return Err(TypeError::TooLong {
                field: "title",
                max: MAX_TITLE_LEN,
                actual: len,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Unvalidated input for creating a post.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub comments_closed: bool,
}

/// A stored discussion post.
///
/// The comment count is not part of the stored record; it is derived per
/// read and carried by [`PostView`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub comments_closed: bool,
}

impl Post {
    /// Validate `input` and build a new post stamped with the current time.
    pub fn create(input: NewPost) -> Result<Self, TypeError> {
        let title = PostTitle::parse(&input.title)?;
        if input.body.trim().is_empty() {
            return Err(TypeError::EmptyField { field: "body" });
        }
        Ok(Self {
            id: PostId::new(),
            title: title.into_inner(),
            body: input.body,
            author: crate::normalize_author(&input.author),
            created_at: now_micros(),
            comments_closed: input.comments_closed,
        })
    }
}

/// Read model of a post: the stored record plus its derived comment count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub comments_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str, body: &str) -> NewPost {
        NewPost {
            title: title.into(),
            body: body.into(),
            author: "alice".into(),
            comments_closed: false,
        }
    }

    #[test]
    fn create_trims_title_and_opens_comments() {
        let post = Post::create(input("  Hello  ", "body")).unwrap();
        assert_eq!(post.title, "Hello");
        assert_eq!(post.author, "alice");
        assert!(!post.comments_closed);
    }

    #[test]
    fn blank_title_rejected() {
        let err = Post::create(input(" ", "body")).unwrap_err();
        assert_eq!(err, TypeError::EmptyField { field: "title" });
    }

    #[test]
    fn blank_body_rejected() {
        let err = Post::create(input("t", "\n\t")).unwrap_err();
        assert_eq!(err, TypeError::EmptyField { field: "body" });
    }

    #[test]
    fn long_title_rejected() {
        let err = PostTitle::parse(&"t".repeat(MAX_TITLE_LEN + 1)).unwrap_err();
        assert!(matches!(err, TypeError::TooLong { field: "title", .. }));
        assert!(PostTitle::parse(&"t".repeat(MAX_TITLE_LEN)).is_ok());
    }

    #[test]
    fn view_flattens_post_fields() {
        let post = Post::create(input("t", "b")).unwrap();
        let view = PostView {
            post: post.clone(),
            comments_count: 3,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], serde_json::json!(post.id.to_string()));
        assert_eq!(json["comments_count"], 3);
        assert_eq!(json["title"], "t");
    }
}

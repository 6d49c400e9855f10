//! Opaque pagination cursors.
//!
//! Wire format: standard base64 of `"<RFC3339 timestamp>:<comment id>"`.
//! The format is a compatibility contract with clients holding cursors from
//! earlier responses; changing it invalidates every outstanding cursor.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use colloquy_types::{Comment, CommentId};

use crate::error::PageError;

/// A decoded position in the comment order.
///
/// Field order matters: the derived `Ord` compares `created_at` first and
/// falls back to `id`, which is exactly the pagination order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CursorKey {
    pub created_at: DateTime<Utc>,
    pub id: CommentId,
}

impl CursorKey {
    pub fn new(created_at: DateTime<Utc>, id: CommentId) -> Self {
        Self { created_at, id }
    }

    pub fn of(comment: &Comment) -> Self {
        Self::new(comment.created_at, comment.id)
    }

    pub fn encode(&self) -> Cursor {
        let raw = format!(
            "{}:{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id
        );
        Cursor(STANDARD.encode(raw))
    }
}

/// An encoded cursor as handed to clients.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a client-supplied string without validating it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<CursorKey, PageError> {
        let bytes = STANDARD
            .decode(self.0.trim())
            .map_err(|e| PageError::cursor(format!("not base64: {e}")))?;
        let text =
            String::from_utf8(bytes).map_err(|_| PageError::cursor("not valid utf-8"))?;

        // RFC3339 timestamps contain ':' themselves; ids never do.
        let (ts, id) = text
            .rsplit_once(':')
            .ok_or_else(|| PageError::cursor("missing separator"))?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| PageError::cursor(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let id = id
            .parse::<CommentId>()
            .map_err(|_| PageError::cursor("bad comment id"))?;

        Ok(CursorKey::new(created_at, id))
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

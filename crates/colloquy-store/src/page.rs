use serde::{Deserialize, Serialize};

use colloquy_types::Comment;

use crate::cursor::{Cursor, CursorKey};
use crate::error::PageError;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Validated pagination arguments.
///
/// Constructed only through [`PageRequest::new`] (or the infallible helpers
/// that feed it known-good values), so every backend sees the same
/// cursor and limit policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    after: Option<CursorKey>,
    limit: usize,
}

impl PageRequest {
    /// Validate raw pagination arguments.
    ///
    /// - `after`: absent or blank starts from the beginning; anything else
    ///   must decode or the request is rejected.
    /// - `limit`: absent uses [`DEFAULT_PAGE_SIZE`]; zero or negative is
    ///   rejected; anything else is honored as given, so a page of `l` items
    ///   followed by a page of `m` equals one page of `l + m`.
    pub fn new(after: Option<&str>, limit: Option<i64>) -> Result<Self, PageError> {
        let after = match after.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(Cursor::from_raw(raw).decode()?),
            None => None,
        };
        let limit = match limit {
            None => DEFAULT_PAGE_SIZE,
            Some(n) if n <= 0 => return Err(PageError::InvalidLimit(n)),
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        };
        Ok(Self { after, limit })
    }

    /// First page of up to `limit` items.
    pub fn first(limit: usize) -> Self {
        Self {
            after: None,
            limit: limit.max(1),
        }
    }

    /// Page of up to `limit` items after an already-decoded key.
    pub fn after_key(key: CursorKey, limit: usize) -> Self {
        Self {
            after: Some(key),
            limit: limit.max(1),
        }
    }

    pub fn after(&self) -> Option<&CursorKey> {
        self.after.as_ref()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of rows a backend should fetch: one extra to learn whether a
    /// next page exists.
    pub fn fetch_limit(&self) -> usize {
        self.limit.saturating_add(1)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEdge {
    pub cursor: Cursor,
    pub node: Comment,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<Cursor>,
}

/// One page of comments in pagination order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPage {
    pub edges: Vec<CommentEdge>,
    pub page_info: PageInfo,
}

impl CommentPage {
    /// Build a page from up to `request.fetch_limit()` rows already in
    /// pagination order. The surplus row, if any, only sets `has_next_page`.
    pub fn from_rows(mut rows: Vec<Comment>, request: &PageRequest) -> Self {
        let has_next_page = rows.len() > request.limit();
        rows.truncate(request.limit());

        let edges: Vec<CommentEdge> = rows
            .into_iter()
            .map(|node| CommentEdge {
                cursor: CursorKey::of(&node).encode(),
                node,
            })
            .collect();
        let end_cursor = edges.last().map(|edge| edge.cursor.clone());

        Self {
            edges,
            page_info: PageInfo {
                has_next_page,
                end_cursor,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Comment> {
        self.edges.iter().map(|edge| &edge.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::{CommentBody, CommentDraft, PostId};

    fn rows(n: usize) -> Vec<Comment> {
        let post = PostId::new();
        (0..n)
            .map(|i| {
                CommentDraft::new(post, None, "u", CommentBody::parse(format!("c{i}")).unwrap())
                    .into_comment(0)
            })
            .collect()
    }

    #[test]
    fn absent_arguments_use_defaults() {
        let req = PageRequest::new(None, None).unwrap();
        assert_eq!(req.limit(), DEFAULT_PAGE_SIZE);
        assert!(req.after().is_none());
        assert_eq!(PageRequest::new(Some("  "), None).unwrap(), req);
    }

    #[test]
    fn non_positive_limit_rejected() {
        assert_eq!(PageRequest::new(None, Some(0)), Err(PageError::InvalidLimit(0)));
        assert_eq!(PageRequest::new(None, Some(-5)), Err(PageError::InvalidLimit(-5)));
    }

    #[test]
    fn large_limit_honored() {
        let req = PageRequest::new(None, Some(120)).unwrap();
        assert_eq!(req.limit(), 120);
        assert_eq!(req.fetch_limit(), 121);
        assert_eq!(PageRequest::first(0).limit(), 1);
        let huge = PageRequest::new(None, Some(i64::MAX)).unwrap();
        assert!(huge.fetch_limit() >= huge.limit());
    }

    #[test]
    fn malformed_cursor_rejected() {
        let err = PageRequest::new(Some("definitely not a cursor"), Some(5)).unwrap_err();
        assert!(matches!(err, PageError::InvalidCursor { .. }));
    }

    #[test]
    fn valid_cursor_decoded() {
        let comment = rows(1).remove(0);
        let key = CursorKey::of(&comment);
        let req = PageRequest::new(Some(key.encode().as_str()), Some(3)).unwrap();
        assert_eq!(req.after(), Some(&key));
        assert_eq!(req.fetch_limit(), 4);
    }

    #[test]
    fn surplus_row_sets_has_next_page() {
        let req = PageRequest::first(2);
        let page = CommentPage::from_rows(rows(3), &req);
        assert_eq!(page.len(), 2);
        assert!(page.page_info.has_next_page);
        assert_eq!(
            page.page_info.end_cursor.as_ref(),
            Some(&page.edges[1].cursor)
        );
    }

    #[test]
    fn empty_page_has_no_end_cursor() {
        let page = CommentPage::from_rows(Vec::new(), &PageRequest::first(5));
        assert!(page.is_empty());
        assert!(!page.page_info.has_next_page);
        assert!(page.page_info.end_cursor.is_none());
    }
}

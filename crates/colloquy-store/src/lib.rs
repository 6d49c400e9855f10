//! Persistence contract for Colloquy.
//!
//! This crate defines the [`Store`] trait that every backend implements,
//! together with the pieces of the contract that must behave identically
//! across backends: the opaque [`Cursor`] codec and keyset pagination
//! ([`PageRequest`] in, [`CommentPage`] out).
//!
//! # Storage Backends
//!
//! - [`InMemoryStore`] -- `HashMap`-based store for tests and single-node use
//! - `PostgresStore` -- PostgreSQL via `sqlx` (cargo feature `postgres`)
//!
//! # Pagination Rules
//!
//! 1. Comments are ordered by `(created_at ASC, id ASC)`; the id breaks ties
//!    between comments created in the same microsecond.
//! 2. A page contains the items strictly after the request cursor.
//! 3. `has_next_page` is true iff at least one further qualifying item exists.
//! 4. A malformed cursor or a non-positive limit is rejected before any
//!    backend is consulted; both checks live in [`PageRequest::new`].

pub mod cursor;
pub mod error;
pub mod memory;
pub mod page;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use cursor::{Cursor, CursorKey};
pub use error::{EntityKind, PageError, StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use page::{CommentEdge, CommentPage, PageInfo, PageRequest, DEFAULT_PAGE_SIZE};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use traits::Store;

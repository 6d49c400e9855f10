//! Batching loader for Colloquy.
//!
//! A [`BatchLoader`] sits in front of a batched lookup ([`BatchFn`]) and
//! collapses the individual `load(key)` calls made during one operation into
//! as few lookups as possible:
//!
//! - The first key requested in an idle loader opens a short coalescing
//!   window ([`LoaderConfig::delay`]).
//! - Keys requested while the window is open join the same batch; repeated
//!   keys share one waiter list.
//! - When the window closes, up to [`LoaderConfig::max_batch`] keys go to
//!   the lookup in one call. Any overflow is flushed right after, without
//!   waiting for another key to arrive.
//! - Successful values are cached for the loader's lifetime. Failures are
//!   delivered to every waiter of the batch and not cached.
//!
//! A loader is meant to live exactly as long as one operation; build a new
//! one per request rather than sharing it.

pub mod error;
pub mod loader;
pub mod traits;

pub use error::{LoadError, LoadResult};
pub use loader::{BatchLoader, LoaderConfig, DEFAULT_DELAY, DEFAULT_MAX_BATCH};
pub use traits::BatchFn;

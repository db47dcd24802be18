//! In-memory request coalescing for asynchronous loads.
//!
//! The [`SingleFlightCache`] guarantees that for any number of concurrent
//! requests for the same key, the expensive load behind it runs at most once.
//! A request goes through the following steps:
//!
//! - If a value is already cached for the key, it is returned right away.
//! - If a load for the key is already in flight, the caller joins it and
//!   receives the same outcome as every other waiter.
//! - Otherwise, the caller starts the load, and every request arriving until
//!   it settles shares its result.
//!
//! Successful results are memoized for the lifetime of the cache. Failures are
//! never memoized: a failed load empties the slot again, and the next request
//! for that key starts a fresh attempt. See [`LoadError`] for the failure
//! taxonomy.
//!
//! The cache is an explicit instance constructed by the caller. Handles are
//! cheap to clone and can be shared freely between tasks and threads; the
//! critical lookup-and-publish step is guarded by a lock, so the
//! at-most-one-load guarantee holds under parallel callers as well as under
//! cooperative single-threaded scheduling.
//!
//! Loads themselves run as spawned tasks on the ambient tokio runtime. This
//! means an in-flight load keeps running even if every caller waiting on it
//! goes away, and late joiners still receive its outcome.

#![warn(missing_docs)]

mod cache;
mod error;

pub use cache::SingleFlightCache;
pub use error::{LoadError, LoadResult};

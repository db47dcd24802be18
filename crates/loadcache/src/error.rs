use std::fmt;
use std::io;

use thiserror::Error;

/// An error that happens while loading the value for a cache entry.
///
/// The outcome of a load is broadcast to every caller waiting on it, so this
/// type is cheap to clone. External error types are captured as their display
/// representation.
///
/// Errors are never memoized: whichever variant a load produces, the affected
/// key becomes empty again and the next request starts a fresh load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The loader failed.
    ///
    /// The attached string contains the loader's own error.
    #[error("load failed: {0}")]
    Failed(String),
    /// The in-flight load went away without producing a result.
    ///
    /// This happens when the loader panics, or when its task is torn down
    /// before settling.
    #[error("load was canceled")]
    Canceled,
}

impl LoadError {
    /// Creates a [`LoadError::Failed`] from any displayable error.
    pub fn failed<E: fmt::Display>(error: E) -> Self {
        Self::Failed(error.to_string())
    }
}

impl From<io::Error> for LoadError {
    fn from(error: io::Error) -> Self {
        Self::failed(error)
    }
}

/// The result of loading a cache entry, either the value or the reason why it
/// could not be produced.
pub type LoadResult<T> = Result<T, LoadError>;

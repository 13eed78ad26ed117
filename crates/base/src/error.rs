use std::io;

use thiserror::Error;

/// Errors surfaced by the table read path.
///
/// Iterators latch the first error they hit and stay invalid; callers
/// discover it through the iterator's `error()` accessor. Point lookups
/// report an absent key as [`Error::NotFound`], which is the only variant
/// that does not indicate something went wrong.
#[derive(Debug, Error)]
pub enum Error {
    /// The file contents violate a format invariant: checksum mismatch,
    /// truncated varint, restart offset past the block end, a key shorter
    /// than its trailer, and so on.
    #[error("corruption: {0}")]
    Corruption(String),

    /// An underlying read failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The requested key is not present in the table.
    #[error("not found")]
    NotFound,

    /// The caller's options do not match the file (e.g. comparator name
    /// mismatch) or an API contract was broken (e.g. out-of-order adds).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

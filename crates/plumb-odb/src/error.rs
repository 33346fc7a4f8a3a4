//! Object database error types.

use crate::ObjectId;
use thiserror::Error;

/// Errors that can occur while reading or writing objects.
#[derive(Debug, Error)]
pub enum OdbError {
    /// Malformed object header, pack entry or delta.
    #[error("format error: {0}")]
    Format(String),

    /// A hash or checksum did not match the content it covers.
    #[error("integrity error: {what} mismatch (expected {expected}, got {actual})")]
    Integrity {
        /// What was being verified.
        what: &'static str,
        /// The value recorded alongside the data.
        expected: String,
        /// The value recomputed from the data.
        actual: String,
    },

    /// A short object id matched nothing.
    #[error("no object matches short id {0}")]
    ShortOidNotFound(String),

    /// A short object id matched more than one object.
    #[error("short id {prefix} is ambiguous ({} candidates)", candidates.len())]
    AmbiguousShortOid {
        /// The prefix that was expanded.
        prefix: String,
        /// Every object id matching the prefix, sorted.
        candidates: Vec<ObjectId>,
    },

    /// The object is absent from the loose store and every pack.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// A string or byte slice is not a valid object id.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// I/O error from the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OdbError {
    /// Builds a checksum/hash mismatch error from two digests.
    pub(crate) fn integrity(what: &'static str, expected: &[u8], actual: &[u8]) -> Self {
        Self::Integrity {
            what,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Returns true if this error means "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

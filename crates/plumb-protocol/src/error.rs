//! Git protocol error types.

use plumb_odb::OdbError;
use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A protocol line does not follow the expected grammar.
    #[error("parse error: expected {expected:?}, got {actual:?}")]
    Parse {
        /// What the grammar required at this point.
        expected: String,
        /// What was received.
        actual: String,
    },

    /// Invalid pkt-line framing.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// A payload too large for one pkt-line.
    #[error("pkt-line payload of {0} bytes exceeds the 65516 byte limit")]
    LineTooLong(usize),

    /// Fatal error reported by the server on side-band channel 3.
    #[error("remote error: {0}")]
    Remote(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The server does not speak the smart HTTP protocol.
    #[error("not a smart HTTP server (content-type {content_type:?})")]
    NotSmartHttp {
        /// Content type the server sent.
        content_type: String,
    },

    /// The server closed the stream without sending anything.
    #[error("empty response from server")]
    EmptyServerResponse,

    /// No remote helper handles this URL scheme.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    /// The remote URL could not be parsed.
    #[error("cannot parse remote URL: {0}")]
    UrlParse(String),

    /// The server does not offer a capability the fetch depends on.
    #[error("server does not support {0}")]
    UnsupportedCapability(String),

    /// A negotiator operation was called in the wrong state.
    #[error("negotiator is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the negotiator is in.
        actual: &'static str,
    },

    /// Object database error while storing received objects.
    #[error("object database error: {0}")]
    Odb(#[from] OdbError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn parse(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Parse {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

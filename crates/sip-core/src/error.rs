//! Error types for sip-core

use thiserror::Error;

/// Result alias used throughout sip-core
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while building, parsing or validating SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The raw bytes could not be parsed as a SIP message
    #[error("Parse error: {0}")]
    Parse(String),

    /// A start line was not a valid request or status line
    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),

    /// A mandatory header was absent
    #[error("Missing mandatory header: {0}")]
    MissingHeader(&'static str),

    /// A header value was present but malformed
    #[error("Invalid {header} header: {value}")]
    InvalidHeader {
        header: &'static str,
        value: String,
    },

    /// Malformed SIP or SIPS URI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Method token contains illegal characters
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// Status code outside 100..=699
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Unknown transport token in a Via header or URI parameter
    #[error("Invalid transport: {0}")]
    InvalidTransport(String),

    /// A builder was finished without a required field
    #[error("Incomplete message: {0}")]
    Incomplete(&'static str),
}

impl Error {
    pub(crate) fn invalid_header(header: &'static str, value: impl Into<String>) -> Self {
        Error::InvalidHeader {
            header,
            value: value.into(),
        }
    }
}

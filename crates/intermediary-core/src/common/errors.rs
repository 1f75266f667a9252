//! Error types for the intermediary-core library

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntermediaryError {
    /// The rule text could not be parsed
    #[error("Rule syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A rule names neither or both of `prefix` and `domain`, or an unknown key
    #[error("Invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Invalid next hop: {0}")]
    InvalidNextHop(String),

    /// A rule set holds at most one default rule
    #[error("Duplicate default rule (next hop {0})")]
    DuplicateDefault(String),
}

pub type Result<T> = std::result::Result<T, IntermediaryError>;

//! # SIP Methods
//!
//! Request methods as defined in RFC 3261 Section 7.1 plus the extension
//! methods this stack handles inside dialogs (PRACK, UPDATE, INFO, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    /// RFC 3262 provisional response acknowledgement
    Prack,
    /// RFC 3311 session update
    Update,
    Info,
    Message,
    Subscribe,
    Notify,
    Refer,
    /// Any other syntactically valid method token
    Extension(String),
}

impl Method {
    /// Wire representation of the method
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Prack => "PRACK",
            Method::Update => "UPDATE",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Extension(name) => name,
        }
    }

    /// Returns true if the method creates an INVITE transaction
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }
}

pub(crate) fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Methods are case-sensitive (RFC 3261 Section 7.1)
        let method = match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "PRACK" => Method::Prack,
            "UPDATE" => Method::Update,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            other => {
                if other.is_empty() || !other.chars().all(is_token_char) {
                    return Err(Error::InvalidMethod(other.to_string()));
                }
                Method::Extension(other.to_string())
            }
        };
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        assert_eq!("INVITE".parse::<Method>().unwrap(), Method::Invite);
        assert_eq!(Method::Prack.to_string(), "PRACK");
        assert_eq!(
            "PUBLISH".parse::<Method>().unwrap(),
            Method::Extension("PUBLISH".to_string())
        );
    }

    #[test]
    fn test_invalid_method() {
        assert!("".parse::<Method>().is_err());
        assert!("IN VITE".parse::<Method>().is_err());
    }
}

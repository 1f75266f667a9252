//! # SIP Status Codes
//!
//! Status codes as defined in RFC 3261 Section 21. Only the codes the
//! protocol engine produces or reacts to have named variants; everything
//! else in 100..=699 is carried as [`StatusCode::Custom`].
//!
//! ```rust
//! use sipstack_sip_core::StatusCode;
//!
//! let status = StatusCode::from_u16(486).unwrap();
//! assert_eq!(status, StatusCode::BusyHere);
//! assert!(status.is_final());
//! assert!(!status.is_success());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// 100 Trying
    Trying,
    /// 180 Ringing
    Ringing,
    /// 181 Call Is Being Forwarded
    CallIsBeingForwarded,
    /// 183 Session Progress
    SessionProgress,
    /// 200 OK
    Ok,
    /// 202 Accepted
    Accepted,
    /// 302 Moved Temporarily
    MovedTemporarily,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 408 Request Timeout
    RequestTimeout,
    /// 480 Temporarily Unavailable
    TemporarilyUnavailable,
    /// 481 Call/Transaction Does Not Exist
    CallOrTransactionDoesNotExist,
    /// 482 Loop Detected
    LoopDetected,
    /// 486 Busy Here
    BusyHere,
    /// 487 Request Terminated
    RequestTerminated,
    /// 488 Not Acceptable Here
    NotAcceptableHere,
    /// 491 Request Pending
    RequestPending,
    /// 500 Server Internal Error
    ServerInternalError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 600 Busy Everywhere
    BusyEverywhere,
    /// 603 Decline
    Decline,
    /// Any other valid status code
    Custom(u16),
}

impl StatusCode {
    /// Creates a status code from its numeric value
    pub fn from_u16(code: u16) -> Result<Self> {
        let status = match code {
            100 => StatusCode::Trying,
            180 => StatusCode::Ringing,
            181 => StatusCode::CallIsBeingForwarded,
            183 => StatusCode::SessionProgress,
            200 => StatusCode::Ok,
            202 => StatusCode::Accepted,
            302 => StatusCode::MovedTemporarily,
            400 => StatusCode::BadRequest,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            408 => StatusCode::RequestTimeout,
            480 => StatusCode::TemporarilyUnavailable,
            481 => StatusCode::CallOrTransactionDoesNotExist,
            482 => StatusCode::LoopDetected,
            486 => StatusCode::BusyHere,
            487 => StatusCode::RequestTerminated,
            488 => StatusCode::NotAcceptableHere,
            491 => StatusCode::RequestPending,
            500 => StatusCode::ServerInternalError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            600 => StatusCode::BusyEverywhere,
            603 => StatusCode::Decline,
            100..=699 => StatusCode::Custom(code),
            _ => return Err(Error::InvalidStatusCode(code)),
        };
        Ok(status)
    }

    /// Numeric value of the status code
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::CallIsBeingForwarded => 181,
            StatusCode::SessionProgress => 183,
            StatusCode::Ok => 200,
            StatusCode::Accepted => 202,
            StatusCode::MovedTemporarily => 302,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::RequestTimeout => 408,
            StatusCode::TemporarilyUnavailable => 480,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::LoopDetected => 482,
            StatusCode::BusyHere => 486,
            StatusCode::RequestTerminated => 487,
            StatusCode::NotAcceptableHere => 488,
            StatusCode::RequestPending => 491,
            StatusCode::ServerInternalError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::BusyEverywhere => 600,
            StatusCode::Decline => 603,
            StatusCode::Custom(code) => *code,
        }
    }

    /// Default reason phrase for the status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.as_u16() {
            100 => "Trying",
            180 => "Ringing",
            181 => "Call Is Being Forwarded",
            182 => "Queued",
            183 => "Session Progress",
            200 => "OK",
            202 => "Accepted",
            302 => "Moved Temporarily",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            408 => "Request Timeout",
            480 => "Temporarily Unavailable",
            481 => "Call/Transaction Does Not Exist",
            482 => "Loop Detected",
            486 => "Busy Here",
            487 => "Request Terminated",
            488 => "Not Acceptable Here",
            491 => "Request Pending",
            500 => "Server Internal Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            600 => "Busy Everywhere",
            603 => "Decline",
            code => match code / 100 {
                1 => "Provisional",
                2 => "Success",
                3 => "Redirection",
                4 => "Client Error",
                5 => "Server Error",
                _ => "Global Failure",
            },
        }
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// 3xx
    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.as_u16())
    }

    /// 3xx-6xx: a final response that does not establish anything
    pub fn is_failure(&self) -> bool {
        self.as_u16() >= 300
    }

    /// Any response >= 200
    pub fn is_final(&self) -> bool {
        self.as_u16() >= 200
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

impl FromStr for StatusCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Parse(format!("invalid status code '{}'", s)))?;
        StatusCode::from_u16(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(StatusCode::Ringing.is_provisional());
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::MovedTemporarily.is_redirection());
        assert!(StatusCode::BusyHere.is_failure());
        assert!(!StatusCode::SessionProgress.is_final());
    }

    #[test]
    fn test_custom_codes() {
        let status = StatusCode::from_u16(599).unwrap();
        assert_eq!(status, StatusCode::Custom(599));
        assert_eq!(status.as_u16(), 599);
        assert!(StatusCode::from_u16(99).is_err());
        assert!(StatusCode::from_u16(700).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!("487".parse::<StatusCode>().unwrap(), StatusCode::RequestTerminated);
    }
}

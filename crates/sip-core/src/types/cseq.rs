//! CSeq and RAck header values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Method;

/// `CSeq: <seq> <method>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let (Some(seq), Some(method), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::invalid_header("CSeq", s));
        };
        let seq = seq
            .parse::<u32>()
            .map_err(|_| Error::invalid_header("CSeq", s))?;
        Ok(CSeq::new(seq, method.parse()?))
    }
}

/// `RAck: <rseq> <cseq> <method>` (RFC 3262 Section 7.2)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RAck {
    pub rseq: u32,
    pub cseq: u32,
    pub method: Method,
}

impl fmt::Display for RAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rseq, self.cseq, self.method)
    }
}

impl FromStr for RAck {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let (Some(rseq), Some(cseq), Some(method), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_header("RAck", s));
        };
        let number = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| Error::invalid_header("RAck", s))
        };
        Ok(RAck {
            rseq: number(rseq)?,
            cseq: number(cseq)?,
            method: method.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cseq() {
        let cseq: CSeq = "314159 INVITE".parse().unwrap();
        assert_eq!(cseq, CSeq::new(314159, Method::Invite));
        assert_eq!(cseq.to_string(), "314159 INVITE");
        assert!("INVITE 1".parse::<CSeq>().is_err());
        assert!("1".parse::<CSeq>().is_err());
    }

    #[test]
    fn test_rack() {
        let rack: RAck = "776656 1 INVITE".parse().unwrap();
        assert_eq!(rack.rseq, 776656);
        assert_eq!(rack.cseq, 1);
        assert_eq!(rack.method, Method::Invite);
    }
}

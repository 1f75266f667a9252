//! Name-addr values used by From, To, Contact, Route and Record-Route.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::uri::parse_params;
use crate::types::Uri;

/// `["display name"] <uri>;tag=...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    /// Dialog tag parameter
    pub tag: Option<String>,
    /// Header parameters other than `tag`
    pub params: Vec<(String, Option<String>)>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        Self {
            display_name: None,
            uri,
            tag: None,
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl From<Uri> for NameAddr {
    fn from(uri: Uri) -> Self {
        NameAddr::new(uri)
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for NameAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (display_name, uri, params) = match s.find('<') {
            Some(open) => {
                let close = s[open..]
                    .find('>')
                    .map(|i| open + i)
                    .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
                let name = s[..open].trim().trim_matches('"').trim();
                let display_name = (!name.is_empty()).then(|| name.to_string());
                let uri: Uri = s[open + 1..close].parse()?;
                (display_name, uri, parse_params(&s[close + 1..]))
            }
            None => {
                // Without angle brackets every parameter belongs to the header
                let (uri, params) = match s.split_once(';') {
                    Some((uri, params)) => (uri, parse_params(params)),
                    None => (s, Vec::new()),
                };
                (None, uri.parse()?, params)
            }
        };

        let mut addr = NameAddr {
            display_name,
            uri,
            tag: None,
            params: Vec::new(),
        };
        for (name, value) in params {
            if name.eq_ignore_ascii_case("tag") {
                addr.tag = value;
            } else {
                addr.params.push((name, value));
            }
        }
        Ok(addr)
    }
}

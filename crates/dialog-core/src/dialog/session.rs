use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Content type used for offers and answers
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Negotiated session parameters: the last offer/answer bodies exchanged.
///
/// Only committed on a successful INVITE, re-INVITE or UPDATE; a rejected
/// modification leaves the value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Body we sent
    pub local: Option<Bytes>,
    /// Body the peer sent
    pub remote: Option<Bytes>,
}

impl Session {
    pub fn is_negotiated(&self) -> bool {
        self.local.is_some() && self.remote.is_some()
    }
}

//! Core dialog types
//!
//! - [`DialogId`]: UUID handle for a dialog
//! - [`DialogKey`]: Call-ID plus local and remote tag, the protocol identity
//! - [`Dialog`]: per-leg state with request construction
//! - [`DialogState`]: lifecycle states
//! - [`Session`]: negotiated offer/answer bodies
//!
//! ## Dialog Lifecycle
//!
//! ```text
//! Initial → Early → Confirmed → Terminated
//!    ↓        ↓        ↓          ↓
//!  INVITE   18x      2xx       BYE, CANCEL/487,
//!  sent/    with     sent/     failure response
//!  recv'd   tag      recv'd
//! ```

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod session;

pub use dialog_id::DialogId;
pub use dialog_impl::Dialog;
pub use dialog_state::DialogState;
pub use session::{Session, SDP_CONTENT_TYPE};

/// Call-ID and tags, as seen from the local side
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogKey {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogKey {
    pub fn new(call_id: String, local_tag: String, remote_tag: String) -> Self {
        Self {
            call_id,
            local_tag,
            remote_tag,
        }
    }

    /// Key of the dialog an inbound request belongs to
    pub fn for_incoming(request: &sipstack_sip_core::Request) -> Option<Self> {
        Some(Self::new(
            request.call_id().to_string(),
            request.to_tag()?.to_string(),
            request.from_tag()?.to_string(),
        ))
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a dialog.
///
/// Variants are ordered; a dialog only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DialogState {
    /// INVITE sent or received, no tagged response yet
    Initial,
    /// A provisional response with a To tag was sent or received
    Early,
    /// A 2xx was sent or received
    Confirmed,
    Terminated,
}

impl DialogState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, DialogState::Terminated)
    }

    /// Before any final response to the initial INVITE
    pub fn is_pending(&self) -> bool {
        matches!(self, DialogState::Initial | DialogState::Early)
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::Initial => write!(f, "Initial"),
            DialogState::Early => write!(f, "Early"),
            DialogState::Confirmed => write!(f, "Confirmed"),
            DialogState::Terminated => write!(f, "Terminated"),
        }
    }
}

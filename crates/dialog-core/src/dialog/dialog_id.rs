use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local handle for a dialog.
///
/// The protocol identity of a dialog is Call-ID plus both tags (see
/// [`super::DialogKey`]); this id stays stable before the remote tag is
/// known and is what applications hold on to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(pub Uuid);

impl DialogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

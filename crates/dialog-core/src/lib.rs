//! # sipstack dialog-core
//!
//! RFC 3261 transaction and dialog layers for sipstack.
//!
//! ## Architecture Position
//!
//! ```text
//! application / proxy
//!      ↓
//! manager      (dialogs: INVITE, 100rel, re-INVITE/UPDATE, CANCEL, BYE)
//!      ↓
//! transaction  (retransmission, matching, timers)
//!      ↓
//! sip-transport (UDP, TCP, TLS)
//! ```
//!
//! ## What This Crate Does
//!
//! - **Transactions**: the four RFC 3261 Section 17 state machines, with
//!   retransmission over UDP and absorption of peer retransmissions
//! - **Dialog State**: Initial → Early → Confirmed → Terminated, never backwards
//! - **CSeq Management**: local sequence generation and remote ordering checks
//! - **Route Sets**: built from Record-Route, loose and strict routing
//! - **Reliable Provisionals**: RFC 3262 PRACK with RSeq/RAck
//! - **Session Modification**: re-INVITE and UPDATE with rollback on failure
//! - **Teardown**: CANCEL including the CANCEL/2xx race, and BYE

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod manager;
pub mod transaction;

// Re-export main types
pub use config::DialogConfig;
pub use dialog::{Dialog, DialogId, DialogKey, DialogState, Session};
pub use errors::{DialogError, DialogResult};
pub use events::{DialogEvent, DialogFailure};
pub use manager::DialogManager;

// Re-export for convenience
pub use sipstack_sip_core::{Method, Request, Response, StatusCode, Uri};
pub use transaction::TransactionKey;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::transaction::{TransactionConfig, TransactionEvent, TransactionManager};
    pub use crate::{
        Dialog, DialogConfig, DialogError, DialogEvent, DialogFailure, DialogId, DialogManager,
        DialogResult, DialogState, Session,
    };
}

//! # SIP transaction layer (RFC 3261 Section 17)
//!
//! A transaction is a request plus all responses to it. This module matches
//! inbound messages to transactions, retransmits over unreliable transports,
//! absorbs retransmissions from the peer and reports outcomes upward as
//! [`TransactionEvent`]s.
//!
//! ## Transaction types
//!
//! | Kind              | States                                              |
//! |-------------------|-----------------------------------------------------|
//! | INVITE client     | Calling, Proceeding, Completed, Terminated          |
//! | non-INVITE client | Trying, Proceeding, Completed, Terminated           |
//! | INVITE server     | Proceeding, Completed, Confirmed, Terminated        |
//! | non-INVITE server | Trying, Proceeding, Completed, Terminated           |
//!
//! The state machines live in [`logic`] and only compute actions; the
//! runner executes them in one task per transaction, and the
//! [`TransactionManager`] owns the table of active transactions.

pub mod config;
pub mod error;
pub mod event;
pub mod key;
pub mod logic;
pub mod manager;
mod runner;
pub mod state;
pub mod timer;
pub mod utils;

pub use config::TransactionConfig;
pub use error::{Result, TransactionError};
pub use event::TransactionEvent;
pub use key::TransactionKey;
pub use manager::TransactionManager;
pub use state::{AtomicTransactionState, TransactionKind, TransactionState};
pub use timer::{TimerSettings, TimerType};

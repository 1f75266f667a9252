//! Error types for dialog-core
//!
//! Transaction-layer errors live in [`crate::transaction::TransactionError`]
//! and convert into [`DialogError`] through `?`.

pub mod dialog_errors;

pub use dialog_errors::{DialogError, DialogResult};

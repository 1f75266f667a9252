//! Events delivered by the dialog engine to the application

pub mod dialog_events;

pub use dialog_events::{DialogEvent, DialogFailure};

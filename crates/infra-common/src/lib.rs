//! Common infrastructure shared by the sipstack crates
//!
//! Currently this is the logging setup used by binaries and tests.

pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
pub use logging::setup::{init_test_logging, parse_log_level, setup_logging, LoggingConfig};

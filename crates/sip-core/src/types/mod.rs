//! Core SIP value types

pub mod address;
pub mod cseq;
pub mod method;
pub mod status;
pub mod transport;
pub mod uri;
pub mod via;

pub use address::NameAddr;
pub use cseq::{CSeq, RAck};
pub use method::Method;
pub use status::StatusCode;
pub use transport::TransportType;
pub use uri::{Scheme, Uri};
pub use via::{Via, BRANCH_MAGIC_COOKIE};

//! Configuration for the dialog engine
//!
//! Timer values come from the transaction layer's
//! [`TimerSettings`](crate::transaction::TimerSettings); this module only
//! holds dialog-level behaviour switches.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use sipstack_sip_core::{TransportType, Uri};

/// Configuration of a [`crate::manager::DialogManager`]
///
/// # Example
///
/// ```rust
/// use sipstack_dialog_core::DialogConfig;
///
/// let config = DialogConfig::new("192.0.2.1:5060".parse().unwrap())
///     .with_user_agent("sipstack/0.1")
///     .with_auto_prack(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Sent-by address for Via headers and the default Contact
    pub local_address: SocketAddr,
    /// Transport written into Via headers
    pub transport: TransportType,
    /// Optional Contact override
    pub contact: Option<Uri>,
    pub user_agent: Option<String>,
    /// Answer reliable provisional responses with PRACK automatically
    pub auto_prack: bool,
    /// Answer out-of-order in-dialog requests with 500 instead of dropping them
    pub reject_out_of_order: bool,
    /// Hang up with BYE when a 2xx wins the race against our CANCEL
    pub bye_after_cancel_race: bool,
    pub max_forwards: u32,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            local_address: SocketAddr::from(([127, 0, 0, 1], 5060)),
            transport: TransportType::Udp,
            contact: None,
            user_agent: None,
            auto_prack: true,
            reject_out_of_order: true,
            bye_after_cancel_race: true,
            max_forwards: 70,
        }
    }
}

impl DialogConfig {
    pub fn new(local_address: SocketAddr) -> Self {
        Self {
            local_address,
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_contact(mut self, contact: Uri) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_auto_prack(mut self, enabled: bool) -> Self {
        self.auto_prack = enabled;
        self
    }

    pub fn with_reject_out_of_order(mut self, enabled: bool) -> Self {
        self.reject_out_of_order = enabled;
        self
    }

    pub fn with_bye_after_cancel_race(mut self, enabled: bool) -> Self {
        self.bye_after_cancel_race = enabled;
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: u32) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    /// Contact URI placed in INVITEs and 2xx/1xx responses
    pub fn contact_uri(&self) -> Uri {
        self.contact.clone().unwrap_or_else(|| {
            let uri = Uri::from_socket_addr(self.local_address);
            match self.transport {
                TransportType::Udp => uri,
                other => uri.with_param("transport", Some(other.to_string().to_lowercase())),
            }
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_forwards == 0 {
            return Err("max_forwards must be greater than zero".into());
        }
        if self.local_address.port() == 0 {
            return Err("local_address must carry a concrete port".into());
        }
        Ok(())
    }
}

//! Timer types and durations for SIP transactions.
//!
//! RFC 3261 defines the timers that drive retransmission and cleanup of
//! transactions:
//!
//! - **Retransmission timers** resend a message over unreliable transports (A, E, G)
//! - **Transaction timeout timers** bound the overall lifetime (B, F, H)
//! - **Wait timers** keep a finished transaction around to absorb
//!   retransmissions (D, I, J, K)
//!
//! Wait timers collapse to zero on reliable transports, where the transport
//! itself takes care of delivery. Timers are not objects of their own here:
//! each transaction task arms them as sleeping tasks and feeds their expiry
//! back into the state machine.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The transaction timers of RFC 3261 Section 17 plus the automatic
/// 100 Trying delay of an INVITE server transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// INVITE client request retransmission
    A,
    /// INVITE client transaction timeout
    B,
    /// INVITE client wait for response retransmissions
    D,
    /// Non-INVITE client request retransmission
    E,
    /// Non-INVITE client transaction timeout
    F,
    /// INVITE server response retransmission
    G,
    /// INVITE server wait for ACK
    H,
    /// INVITE server wait for ACK retransmissions
    I,
    /// Non-INVITE server wait for request retransmissions
    J,
    /// Non-INVITE client wait for response retransmissions
    K,
    /// INVITE server delay before sending 100 Trying on behalf of the TU
    Trying,
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerType::Trying => write!(f, "100"),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Base timer values from which every transaction timer is derived.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sipstack_dialog_core::transaction::TimerSettings;
///
/// let timers = TimerSettings::default();
/// assert_eq!(timers.transaction_timeout(), Duration::from_secs(32));
/// assert_eq!(timers.wait_time_d(true), Duration::ZERO);
/// assert_eq!(timers.next_interval(Duration::from_secs(4)), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// RTT estimate (T1)
    pub t1: Duration,
    /// Maximum retransmission interval for non-INVITE requests and INVITE responses (T2)
    pub t2: Duration,
    /// Maximum time a message stays in the network (T4)
    pub t4: Duration,
    /// Delay before an INVITE server transaction answers 100 Trying itself
    pub timer_100: Duration,
    /// Upper bound for the Timer A interval
    pub invite_retransmit_cap: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        Self {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_100: Duration::from_millis(200),
            invite_retransmit_cap: t1 * 64,
        }
    }
}

impl TimerSettings {
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    pub fn with_t2(mut self, t2: Duration) -> Self {
        self.t2 = t2;
        self
    }

    pub fn with_t4(mut self, t4: Duration) -> Self {
        self.t4 = t4;
        self
    }

    pub fn with_timer_100(mut self, timer_100: Duration) -> Self {
        self.timer_100 = timer_100;
        self
    }

    pub fn with_invite_retransmit_cap(mut self, cap: Duration) -> Self {
        self.invite_retransmit_cap = cap;
        self
    }

    /// Timers B, F and H: 64*T1
    pub fn transaction_timeout(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer D: 32 s on unreliable transports
    pub fn wait_time_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            Duration::from_secs(32)
        }
    }

    /// Timer I: T4 on unreliable transports
    pub fn wait_time_i(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Timer J: 64*T1 on unreliable transports
    pub fn wait_time_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.transaction_timeout()
        }
    }

    /// Timer K: T4 on unreliable transports
    pub fn wait_time_k(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.t4
        }
    }

    /// Next Timer A interval after `current` has elapsed
    pub fn next_invite_interval(&self, current: Duration) -> Duration {
        (current * 2).min(self.invite_retransmit_cap)
    }

    /// Next Timer E or G interval after `current` has elapsed
    pub fn next_interval(&self, current: Duration) -> Duration {
        (current * 2).min(self.t2)
    }

    /// Checks the relations RFC 3261 relies on between the base values
    pub fn validate(&self) -> Result<(), String> {
        if self.t1.is_zero() {
            return Err("t1 must be greater than zero".into());
        }
        if self.t2 < self.t1 {
            return Err("t2 must not be smaller than t1".into());
        }
        if self.invite_retransmit_cap < self.t1 {
            return Err("invite_retransmit_cap must not be smaller than t1".into());
        }
        Ok(())
    }
}

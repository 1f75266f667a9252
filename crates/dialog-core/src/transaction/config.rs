use serde::{Deserialize, Serialize};

use super::TimerSettings;

/// Configuration of a [`super::TransactionManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub timers: TimerSettings,
    /// Capacity of each transaction's command queue
    pub channel_capacity: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            channel_capacity: 100,
        }
    }
}

impl TransactionConfig {
    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than zero".into());
        }
        self.timers.validate()
    }
}

//! Poller configuration

use crate::error::ObdError;
use crate::pid::Pid;
use crate::protocol::FUNCTIONAL_REQUEST_ID;
use can_driver::{MessageSlot, MAX_DLC, STANDARD_ID_MASK};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the request/response poller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// PID requested every cycle (default: engine RPM)
    pub pid: u8,
    /// Request identifier
    pub request_id: u16,
    /// Response identifier to filter on; `None` accepts any identifier
    pub response_id: Option<u16>,
    /// Arm the receive object with a zero mask, ignoring `response_id`
    pub accept_any_response: bool,
    /// Message object used for requests
    pub tx_slot: u8,
    /// Message object used for responses
    pub rx_slot: u8,
    /// Declared request length; bytes past the request are padding
    pub request_len: usize,
    /// Minimum spacing between consecutive requests (milliseconds)
    pub min_request_interval_ms: u64,
    /// Time to wait for a response before resending (milliseconds)
    pub response_timeout_ms: u64,
    /// Consecutive timeouts before the ECU is reported silent
    pub max_retries: u32,
    /// Check the service and PID echo before trusting the data bytes
    pub validate_echo: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            pid: Pid::Rpm.as_hex(),
            request_id: FUNCTIONAL_REQUEST_ID,
            response_id: Some(0x7E7),
            accept_any_response: false,
            tx_slot: 1,
            rx_slot: 2,
            request_len: MAX_DLC,
            min_request_interval_ms: 100,
            response_timeout_ms: 1000,
            max_retries: 3,
            validate_echo: true,
        }
    }
}

impl PollerConfig {
    /// Check ranges and resolve the message objects as `(tx, rx)`
    pub fn validate(&self) -> Result<(MessageSlot, MessageSlot), ObdError> {
        let tx = MessageSlot::new(self.tx_slot)?;
        let rx = MessageSlot::new(self.rx_slot)?;
        if tx == rx {
            return Err(ObdError::SlotConflict(self.tx_slot));
        }
        if self.request_id > STANDARD_ID_MASK {
            return Err(ObdError::InvalidConfig(format!(
                "request_id {:#X} exceeds 11 bits",
                self.request_id
            )));
        }
        if let Some(id) = self.response_id {
            if id > STANDARD_ID_MASK {
                return Err(ObdError::InvalidConfig(format!(
                    "response_id {:#X} exceeds 11 bits",
                    id
                )));
            }
        }
        if !(3..=MAX_DLC).contains(&self.request_len) {
            return Err(ObdError::InvalidConfig(format!(
                "request_len {} must be within 3..=8",
                self.request_len
            )));
        }
        if self.max_retries == 0 {
            return Err(ObdError::InvalidConfig("max_retries must be at least 1".into()));
        }
        Ok((tx, rx))
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Acceptance filter `(id, mask)` for the receive object
    pub fn response_filter(&self) -> (u16, u16) {
        match self.response_id {
            Some(id) if !self.accept_any_response => (id, STANDARD_ID_MASK),
            _ => (0, 0),
        }
    }
}

//! OBD-II Error Types

use can_driver::DriverError;
use thiserror::Error;

/// Errors that can occur while setting up OBD-II polling
#[derive(Debug, Error)]
pub enum ObdError {
    /// CAN controller bring-up or addressing error
    #[error("CAN driver error: {0}")]
    Driver(#[from] DriverError),

    /// Request and response share one message object
    #[error("Message object {0} assigned to both TX and RX")]
    SlotConflict(u8),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

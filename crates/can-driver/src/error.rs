//! CAN Driver Error Types

use thiserror::Error;

/// Errors raised while bringing up or addressing the CAN controller
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Peripheral never reported ready during bring-up
    #[error("CAN peripheral not ready after {attempts} attempts")]
    PeripheralNotReady { attempts: u32 },

    /// Bit rate outside what a classic CAN controller supports
    #[error("Invalid CAN bit rate: {0} bit/s")]
    InvalidBitRate(u32),

    /// Message object number outside 1..=32
    #[error("Invalid message object slot: {0}")]
    InvalidSlot(u8),

    /// Identifier does not fit in 11 bits
    #[error("Invalid standard identifier: {0:#05X}")]
    InvalidId(u16),

    /// More than 8 payload bytes
    #[error("Payload too long: {0} bytes (max 8)")]
    PayloadTooLong(usize),
}

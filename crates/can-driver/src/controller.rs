//! Message-Object Controller API
//!
//! The fixed peripheral API the transport is written against. A hardware
//! backend maps each call onto the controller's registers; the
//! [`SimulatedController`](crate::SimulatedController) models them in
//! software.

use crate::error::DriverError;
use crate::frame::CanFrame;
use serde::{Deserialize, Serialize};

/// Raw cause value the controller reports for a status/error interrupt
pub const STATUS_CAUSE: u32 = 0x8000;

/// Number of message objects in the controller
pub const MESSAGE_OBJECTS: u8 = 32;

/// Interrupt service routine installed on the controller.
///
/// Invoked with the controller that raised the interrupt; it must run to
/// completion without blocking.
pub type InterruptHandler = Box<dyn Fn(&dyn CanController) + Send + Sync>;

/// A message object number (1..=32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageSlot(u8);

impl MessageSlot {
    pub fn new(slot: u8) -> Result<Self, DriverError> {
        if (1..=MESSAGE_OBJECTS).contains(&slot) {
            Ok(Self(slot))
        } else {
            Err(DriverError::InvalidSlot(slot))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

/// How a message object is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Tx,
    Rx,
}

/// Which controller status register to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRegister {
    Control,
    NewData,
}

/// Decoded interrupt cause register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCause {
    /// Nothing pending
    None,
    /// Controller status/error event
    Status,
    /// Completion on a message object
    Object(MessageSlot),
    /// Value outside the documented encoding
    Unknown(u32),
}

impl From<u32> for InterruptCause {
    fn from(raw: u32) -> Self {
        match raw {
            0 => Self::None,
            STATUS_CAUSE => Self::Status,
            n if n <= MESSAGE_OBJECTS as u32 => match MessageSlot::new(n as u8) {
                Ok(slot) => Self::Object(slot),
                Err(_) => Self::Unknown(raw),
            },
            _ => Self::Unknown(raw),
        }
    }
}

/// Control register bits relevant to diagnostics
pub mod status {
    /// Error warning limit reached
    pub const ERROR_WARNING: u32 = 0x40;
    /// Bus-off
    pub const BUS_OFF: u32 = 0x80;
}

/// Bus bring-up parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Controller input clock (Hz)
    pub clock_hz: u32,
    /// Nominal bit rate (bit/s)
    pub bit_rate: u32,
    /// Ready polls before giving up on the peripheral
    pub ready_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            clock_hz: 16_000_000,
            bit_rate: 500_000,
            ready_attempts: 10_000,
        }
    }
}

/// Message-object CAN controller
pub trait CanController: Send + Sync {
    /// Whether the peripheral finished its power-up sequence
    fn is_ready(&self) -> bool;

    /// Reset message objects and enter init mode
    fn init(&self);

    /// Program bit timing
    fn set_bit_rate(&self, clock_hz: u32, bit_rate: u32) -> Result<(), DriverError>;

    /// Install the interrupt service routine
    fn register_interrupt(&self, handler: InterruptHandler);

    /// Unmask master, error and status interrupts
    fn enable_interrupts(&self);

    /// Leave init mode and join the bus
    fn enable(&self);

    /// Load a message object
    fn set_object(&self, slot: MessageSlot, frame: &CanFrame, kind: ObjectType);

    /// Read a message object into `frame`, optionally clearing its pending
    /// interrupt together with the new-data and overrun bits
    fn get_object(&self, slot: MessageSlot, frame: &mut CanFrame, clear_pending: bool);

    /// Raw interrupt cause register
    fn interrupt_cause(&self) -> u32;

    /// Acknowledge the interrupt of one message object
    fn clear_interrupt(&self, slot: MessageSlot);

    /// Read a status register; reading `Control` acknowledges a status interrupt
    fn status(&self, register: StatusRegister) -> u32;
}

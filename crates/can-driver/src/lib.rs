//! CAN Controller Driver
//!
//! This crate binds a message-object CAN controller (one hardware buffer per
//! direction and filter) to an interrupt-driven receive path. The interrupt
//! handler only classifies causes into atomic flags; the main loop consumes
//! them and moves frames in and out of long-lived buffers.

mod controller;
mod error;
mod frame;
mod interrupt;
mod report;
mod sim;
mod transport;

pub use controller::{
    status, BusConfig, CanController, InterruptCause, InterruptHandler, MessageSlot, ObjectType,
    StatusRegister, MESSAGE_OBJECTS, STATUS_CAUSE,
};
pub use error::DriverError;
pub use frame::{CanFrame, Direction, FrameFlags, MAX_DLC, STANDARD_ID_MASK};
pub use interrupt::{InterruptClassifier, InterruptOutcome, PendingFlags};
pub use report::{DiagnosticSink, MemorySink, Reporter, TracingSink};
pub use sim::{Responder, SimulatedController};
pub use transport::CanTransport;

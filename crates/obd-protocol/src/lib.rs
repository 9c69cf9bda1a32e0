//! OBD-II Protocol Implementation
//!
//! This crate polls a single "show current data" PID over a message-object
//! CAN controller using 11-bit diagnostic addressing, and extracts the two
//! data bytes of each answer.

mod config;
mod error;
mod pid;
mod poller;
mod protocol;

pub use config::PollerConfig;
pub use error::ObdError;
pub use pid::{Pid, PidResponse, RequestDescriptor, POSITIVE_RESPONSE_OFFSET};
pub use poller::{CycleState, ObdPoller, PollOutcome, PollerStats, Reading};
pub use protocol::{ObdProtocol, FUNCTIONAL_REQUEST_ID};

/// OBD-II service numbers
pub mod mode {
    /// Show current data
    pub const CURRENT_DATA: u8 = 0x01;
}

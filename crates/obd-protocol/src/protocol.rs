//! OBD-II Bus Protocol Profiles

use can_driver::BusConfig;
use serde::{Deserialize, Serialize};

/// Functional (broadcast) request identifier for 11-bit addressing
pub const FUNCTIONAL_REQUEST_ID: u16 = 0x7DF;

/// Supported OBD-II CAN profiles (11-bit identifiers only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ObdProtocol {
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    #[default]
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
}

impl ObdProtocol {
    /// Nominal bus bit rate
    pub fn bit_rate(&self) -> u32 {
        match self {
            ObdProtocol::Iso15765_4Can11bit500 => 500_000,
            ObdProtocol::Iso15765_4Can11bit250 => 250_000,
        }
    }

    /// Bring-up parameters for a controller clocked at `clock_hz`
    pub fn bus_config(&self, clock_hz: u32) -> BusConfig {
        BusConfig {
            clock_hz,
            bit_rate: self.bit_rate(),
            ..Default::default()
        }
    }
}

//! OBD-II PID Definitions and Response Parsing
//!
//! Defines the standard OBD-II Parameter IDs (PIDs), the single-frame
//! request layout and the decoding formulas for the reported bytes.

use crate::mode;
use serde::{Deserialize, Serialize};

/// Added to the service byte in a positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
}

impl Pid {
    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Get the number of data bytes in the response
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm | Pid::Maf => 2,
            _ => 1,
        }
    }
}

impl TryFrom<u8> for Pid {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x04 => Ok(Pid::EngineLoad),
            0x05 => Ok(Pid::CoolantTemp),
            0x0B => Ok(Pid::IntakeManifoldPressure),
            0x0C => Ok(Pid::Rpm),
            0x0D => Ok(Pid::Speed),
            0x10 => Ok(Pid::Maf),
            0x11 => Ok(Pid::ThrottlePosition),
            other => Err(other),
        }
    }
}

/// A single-frame "show current data" request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDescriptor {
    pid: u8,
}

impl RequestDescriptor {
    /// Number of bytes following the length byte
    pub const BYTE_COUNT: u8 = 2;

    pub fn new(pid: u8) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u8 {
        self.pid
    }

    /// `[byte count, service, pid]`
    pub fn payload(&self) -> [u8; 3] {
        [Self::BYTE_COUNT, mode::CURRENT_DATA, self.pid]
    }

    /// Service byte a positive answer echoes
    pub fn expected_service(&self) -> u8 {
        mode::CURRENT_DATA + POSITIVE_RESPONSE_OFFSET
    }
}

/// Decoded answer to a PID query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidResponse {
    /// The PID that was queried
    pub pid: u8,
    /// Timestamp when the response was received (Unix ms)
    pub timestamp_ms: u64,
    /// Decoded value
    pub value: f64,
    /// Raw data bytes from the response
    pub raw_bytes: Vec<u8>,
}

impl PidResponse {
    /// Create a new PID response by decoding raw bytes
    pub fn decode(pid: u8, raw_bytes: Vec<u8>, timestamp_ms: u64) -> Self {
        let value = Self::decode_value(pid, &raw_bytes);
        Self {
            pid,
            timestamp_ms,
            value,
            raw_bytes,
        }
    }

    /// Decode the raw bytes to a value based on the PID formula
    fn decode_value(pid: u8, bytes: &[u8]) -> f64 {
        match pid {
            // RPM: ((A*256)+B)/4
            0x0C if bytes.len() >= 2 => ((bytes[0] as f64 * 256.0) + bytes[1] as f64) / 4.0,
            // Speed: A (km/h)
            0x0D if !bytes.is_empty() => bytes[0] as f64,
            // Coolant Temp: A - 40 (°C)
            0x05 if !bytes.is_empty() => bytes[0] as f64 - 40.0,
            // Engine Load / Throttle: A * 100 / 255 (%)
            0x04 | 0x11 if !bytes.is_empty() => bytes[0] as f64 * 100.0 / 255.0,
            // MAF: ((A*256)+B) / 100 (g/s)
            0x10 if bytes.len() >= 2 => ((bytes[0] as f64 * 256.0) + bytes[1] as f64) / 100.0,
            // Intake manifold pressure: A (kPa)
            0x0B if !bytes.is_empty() => bytes[0] as f64,
            _ => 0.0,
        }
    }
}

//! Simulated ECU
//!
//! Answers mode-01 requests on the bus so the monitor runs end to end
//! without a vehicle attached.

use can_driver::{CanFrame, Responder, MAX_DLC};
use obd_protocol::{mode, Pid, FUNCTIONAL_REQUEST_ID, POSITIVE_RESPONSE_OFFSET};
use tracing::debug;

/// Span of the simulated RPM sweep above idle
const RPM_SWEEP: u64 = 2700;

/// Highest idle speed whose sweep still fits the `(256A + B) / 4` encoding
pub const MAX_IDLE_RPM: u16 = (u16::MAX / 4) - RPM_SWEEP as u16;

/// Software stand-in for an engine control unit
#[derive(Debug, Clone)]
pub struct SimulatedEcu {
    response_id: u16,
    idle_rpm: u16,
    answered: u64,
}

impl SimulatedEcu {
    /// `idle_rpm` is capped at [`MAX_IDLE_RPM`] so the sweep stays encodable
    pub fn new(response_id: u16, idle_rpm: u16) -> Self {
        Self {
            response_id,
            idle_rpm: idle_rpm.min(MAX_IDLE_RPM),
            answered: 0,
        }
    }

    /// Build the answer to `request`, if it is one this ECU serves
    pub fn respond(&mut self, request: &CanFrame) -> Option<CanFrame> {
        let bytes = request.bytes();
        if request.raw_id() != FUNCTIONAL_REQUEST_ID || bytes[1] != mode::CURRENT_DATA {
            return None;
        }

        let pid = Pid::try_from(bytes[2]).ok()?;
        let raw = self.current_value(pid).to_be_bytes();
        let data = &raw[raw.len() - pid.response_bytes()..];
        self.answered += 1;

        let mut payload = [0u8; MAX_DLC];
        payload[0] = 2 + data.len() as u8;
        payload[1] = mode::CURRENT_DATA + POSITIVE_RESPONSE_OFFSET;
        payload[2] = pid.as_hex();
        payload[3..3 + data.len()].copy_from_slice(data);

        debug!("ECU answering PID {:#04X} with {:02X?}", pid.as_hex(), data);
        CanFrame::with_data(self.response_id, &payload).ok()
    }

    /// Raw encoded value; single-byte PIDs use the low byte
    fn current_value(&self, pid: Pid) -> u16 {
        let tick = self.answered;
        match pid {
            Pid::Rpm => (self.idle_rpm + (tick * 50 % RPM_SWEEP) as u16) * 4,
            Pid::Speed => (tick % 120) as u16,
            // 90°C stored with the +40 offset
            Pid::CoolantTemp => 130,
            Pid::EngineLoad | Pid::ThrottlePosition => 51 + (tick % 153) as u16,
            Pid::Maf => 500 + (tick % 4500) as u16,
            Pid::IntakeManifoldPressure => 35,
        }
    }

    /// Box this ECU as a controller responder
    pub fn into_responder(mut self) -> Responder {
        Box::new(move |request: &CanFrame| self.respond(request))
    }
}

//! Request/Response Poller
//!
//! Drives the request cadence for one PID and interprets the answers the
//! interrupt path flags as received. Each cycle runs
//! `Idle -> RequestSent -> Idle`; a response deadline resends the request
//! instead of stalling in `RequestSent`.

use crate::config::PollerConfig;
use crate::error::ObdError;
use crate::pid::{PidResponse, RequestDescriptor};
use can_driver::{
    BusConfig, CanController, CanFrame, CanTransport, FrameFlags, InterruptClassifier,
    MessageSlot, PendingFlags, Reporter,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Response layout: `[len, service + 0x40, pid, A, B, ...]`
const SERVICE_INDEX: usize = 1;
const PID_INDEX: usize = 2;
const FIRST_DATA_INDEX: usize = 3;
const SECOND_DATA_INDEX: usize = 4;

/// Shortest frame carrying both data bytes
const MIN_RESPONSE_LEN: usize = SECOND_DATA_INDEX + 1;

/// Where the current request cycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    RequestSent,
}

/// The two data bytes extracted from a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub pid: u8,
    pub first: u8,
    pub second: u8,
    /// The controller reported an overwritten frame before this one was read
    pub data_lost: bool,
}

impl Reading {
    pub fn bytes(&self) -> (u8, u8) {
        (self.first, self.second)
    }

    /// Physical value per the PID formula
    pub fn decode(&self, timestamp_ms: u64) -> PidResponse {
        PidResponse::decode(self.pid, vec![self.first, self.second], timestamp_ms)
    }
}

/// Result of one `poll_and_handle_response` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing pending and nothing to send
    Idle,
    /// Waiting on a response or on request pacing
    Waiting,
    /// A response was consumed
    Received(Reading),
    /// A response was consumed but failed echo validation
    Rejected,
    /// A follow-up request went out after a response
    Resent,
    /// The response deadline passed and the request went out again
    TimedOut { attempt: u32 },
}

/// Counters over the poller's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub requests: u64,
    pub responses: u64,
    pub data_lost: u64,
    pub timeouts: u64,
    pub rejected: u64,
}

/// OBD-II single-PID poller over a message-object CAN controller
pub struct ObdPoller<C: CanController> {
    transport: CanTransport<C>,
    flags: Arc<PendingFlags>,
    reporter: Reporter,
    config: PollerConfig,
    tx_slot: MessageSlot,
    rx_slot: MessageSlot,
    /// Reused every cycle; bytes past the request stay as they were
    tx_frame: CanFrame,
    rx_frame: CanFrame,
    state: CycleState,
    requested_pid: u8,
    /// A response was processed and another request should follow
    retry: bool,
    last_sent: Option<Instant>,
    consecutive_timeouts: u32,
    stats: PollerStats,
}

impl<C: CanController + 'static> ObdPoller<C> {
    /// Bring up the controller and wire its interrupt to a new poller
    pub fn attach(
        controller: Arc<C>,
        bus: &BusConfig,
        config: PollerConfig,
        reporter: Reporter,
    ) -> Result<Self, ObdError> {
        let (tx_slot, rx_slot) = config.validate()?;
        let flags = Arc::new(PendingFlags::new());
        let transport = CanTransport::new(controller);

        let classifier = InterruptClassifier::new(
            rx_slot,
            Some(tx_slot),
            Arc::clone(&flags),
            reporter.clone(),
        );
        transport.configure(bus, Arc::new(classifier))?;

        let mut tx_frame = CanFrame::tx(config.request_id, config.request_len)?;
        tx_frame.set_flags(FrameFlags::TX_INT_ENABLE);

        let response = match config.response_filter() {
            (_, 0) => "any".to_string(),
            (id, _) => format!("{:#05X}", id),
        };
        info!(
            "OBD poller attached: PID {:#04X}, request {:#05X}, response {}",
            config.pid, config.request_id, response
        );

        Ok(Self {
            transport,
            flags,
            reporter,
            tx_slot,
            rx_slot,
            tx_frame,
            rx_frame: CanFrame::rx(),
            state: CycleState::Idle,
            requested_pid: config.pid,
            retry: false,
            last_sent: None,
            consecutive_timeouts: 0,
            stats: PollerStats::default(),
            config,
        })
    }

    /// Arm the response object and issue the first request
    pub fn start(&mut self) -> Result<(), ObdError> {
        let (filter, mask) = self.config.response_filter();
        self.transport
            .arm_receive(self.rx_slot, filter, mask, &mut self.rx_frame)?;
        self.send_request(self.config.pid);
        Ok(())
    }

    /// Write `[2, 1, pid]` into the request frame and hand it to the controller
    pub fn send_request(&mut self, pid: u8) {
        let request = RequestDescriptor::new(pid);
        self.tx_frame.bytes_mut()[..3].copy_from_slice(&request.payload());

        self.reporter.request_sent(pid);

        self.requested_pid = pid;
        self.retry = false;
        self.state = CycleState::RequestSent;
        self.last_sent = Some(Instant::now());
        self.stats.requests += 1;

        // A simulated ECU may answer inside this call
        self.transport.transmit(self.tx_slot, &self.tx_frame);
    }

    /// One main-loop step: consume a flagged response, or resend when due
    pub fn poll_and_handle_response(&mut self) -> PollOutcome {
        if self.flags.take_tx() {
            trace!("Request on object {} transmitted", self.tx_slot.get());
        }

        if self.flags.take_rx() {
            return self.handle_response();
        }

        if self.retry {
            if self.pacing_elapsed() {
                self.send_request(self.config.pid);
                return PollOutcome::Resent;
            }
            return PollOutcome::Waiting;
        }

        if self.state == CycleState::RequestSent {
            if self.deadline_passed() {
                return self.handle_timeout();
            }
            return PollOutcome::Waiting;
        }

        PollOutcome::Idle
    }

    fn handle_response(&mut self) -> PollOutcome {
        self.transport.fetch(self.rx_slot, &mut self.rx_frame);
        self.stats.responses += 1;
        self.consecutive_timeouts = 0;
        self.state = CycleState::Idle;
        self.retry = true;

        let data_lost = self.rx_frame.data_lost();
        if data_lost {
            self.reporter.data_loss();
            self.stats.data_lost += 1;
        }

        let bytes = *self.rx_frame.bytes();
        if self.config.validate_echo && !self.echo_matches(&bytes) {
            self.reporter
                .unexpected_response(bytes[SERVICE_INDEX], bytes[PID_INDEX]);
            self.stats.rejected += 1;
            return PollOutcome::Rejected;
        }

        let reading = Reading {
            pid: self.requested_pid,
            first: bytes[FIRST_DATA_INDEX],
            second: bytes[SECOND_DATA_INDEX],
            data_lost,
        };
        self.reporter.received(reading.first, reading.second);
        PollOutcome::Received(reading)
    }

    fn echo_matches(&self, bytes: &[u8]) -> bool {
        let request = RequestDescriptor::new(self.requested_pid);
        self.rx_frame.len() >= MIN_RESPONSE_LEN
            && bytes[SERVICE_INDEX] == request.expected_service()
            && bytes[PID_INDEX] == request.pid()
    }

    fn handle_timeout(&mut self) -> PollOutcome {
        self.consecutive_timeouts += 1;
        self.stats.timeouts += 1;
        let attempt = self.consecutive_timeouts;

        self.reporter.no_response(self.requested_pid, attempt);
        if attempt == self.config.max_retries {
            self.reporter.retries_exhausted(self.requested_pid, attempt);
        }

        debug!("Resending PID {:#04X} after timeout", self.config.pid);
        self.send_request(self.config.pid);
        PollOutcome::TimedOut { attempt }
    }

    fn pacing_elapsed(&self) -> bool {
        self.last_sent
            .map(|at| at.elapsed() >= self.config.min_request_interval())
            .unwrap_or(true)
    }

    fn deadline_passed(&self) -> bool {
        self.last_sent
            .map(|at| at.elapsed() >= self.config.response_timeout())
            .unwrap_or(false)
    }

    /// Whether the controller last reported a status/error event
    pub fn bus_error(&self) -> bool {
        self.flags.error()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn retry_pending(&self) -> bool {
        self.retry
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn tx_frame(&self) -> &CanFrame {
        &self.tx_frame
    }

    pub fn rx_frame(&self) -> &CanFrame {
        &self.rx_frame
    }

    pub fn flags(&self) -> &Arc<PendingFlags> {
        &self.flags
    }

    pub fn transport(&self) -> &CanTransport<C> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_driver::{status, MemorySink, SimulatedController};
    use proptest::prelude::*;

    const RESPONSE: [u8; 8] = [4, 0x41, 0x0C, 0x1A, 0x2B, 0, 0, 0];

    struct Harness {
        sim: Arc<SimulatedController>,
        sink: Arc<MemorySink>,
        poller: ObdPoller<SimulatedController>,
    }

    fn harness(config: PollerConfig) -> Harness {
        let sim = Arc::new(SimulatedController::new());
        let sink = Arc::new(MemorySink::new());
        let poller = ObdPoller::attach(
            sim.clone(),
            &BusConfig::default(),
            config,
            Reporter::new(sink.clone()),
        )
        .unwrap();
        Harness { sim, sink, poller }
    }

    fn eager() -> PollerConfig {
        PollerConfig {
            min_request_interval_ms: 0,
            response_timeout_ms: 60_000,
            ..Default::default()
        }
    }

    fn response(data: &[u8]) -> CanFrame {
        CanFrame::with_data(0x7E7, data).unwrap()
    }

    #[test]
    fn test_round_trip_rpm() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        assert_eq!(&h.sim.transmitted()[0].bytes()[..3], &[2, 1, 0x0C]);

        assert!(h.sim.deliver(&response(&RESPONSE)));
        match h.poller.poll_and_handle_response() {
            PollOutcome::Received(reading) => {
                assert_eq!(reading.bytes(), (26, 43));
                assert!(!reading.data_lost);
                assert!((reading.decode(0).value - 1674.75).abs() < 0.01);
            }
            other => panic!("expected a reading, got {:?}", other),
        }
    }

    #[test]
    fn test_normal_cycle_resends() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        h.sim.deliver(&response(&RESPONSE));

        assert!(matches!(
            h.poller.poll_and_handle_response(),
            PollOutcome::Received(_)
        ));
        assert!(h.poller.retry_pending());
        assert_eq!(h.poller.state(), CycleState::Idle);

        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Resent);
        assert!(!h.poller.retry_pending());
        assert_eq!(h.poller.state(), CycleState::RequestSent);

        let sent = h.sim.transmitted();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].raw_id(), 0x7DF);
        assert_eq!(&sent[1].bytes()[..3], &[2, 1, 0x0C]);
        assert_eq!(
            h.sink.lines(),
            vec![
                "Sending request for PID 12",
                "Received msg: 26 43",
                "Sending request for PID 12",
            ]
        );
    }

    #[test]
    fn test_rx_flag_observed_once() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        h.sim.deliver(&response(&RESPONSE));
        assert!(h.poller.flags().rx_pending());

        h.poller.poll_and_handle_response();

        assert!(!h.poller.flags().rx_pending());
        assert_eq!(h.sim.reads(), 1);
        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Resent);
        assert_eq!(h.sim.reads(), 1);
    }

    #[test]
    fn test_poll_without_flags_is_silent() {
        let mut h = harness(eager());
        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Idle);

        h.poller.start().unwrap();
        // consumes the transmit-complete flag
        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Waiting);
        h.sink.clear();
        let sent = h.sim.transmitted().len();
        let reads = h.sim.reads();

        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Waiting);

        assert!(h.sink.is_empty());
        assert_eq!(h.sim.transmitted().len(), sent);
        assert_eq!(h.sim.reads(), reads);
    }

    #[test]
    fn test_overrun_reports_once_and_keeps_bytes() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        h.sim.deliver(&response(&[4, 0x41, 0x0C, 0x01, 0x02, 0, 0, 0]));
        h.sim.deliver(&response(&[4, 0x41, 0x0C, 0x0F, 0xA0, 0, 0, 0]));

        match h.poller.poll_and_handle_response() {
            PollOutcome::Received(reading) => {
                assert!(reading.data_lost);
                assert_eq!(reading.bytes(), (0x0F, 0xA0));
            }
            other => panic!("expected a reading, got {:?}", other),
        }
        h.poller.poll_and_handle_response();

        assert_eq!(h.sink.count("CAN message loss detected"), 1);
        assert_eq!(h.poller.stats().data_lost, 1);
    }

    #[test]
    fn test_status_event_then_recovery() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        h.sink.clear();

        h.sim.raise_status(status::BUS_OFF);
        assert!(h.poller.bus_error());
        assert!(!h.poller.flags().rx_pending());
        assert!(h.sink.is_empty());

        h.sim.deliver(&response(&RESPONSE));
        assert!(!h.poller.bus_error());
        assert!(matches!(
            h.poller.poll_and_handle_response(),
            PollOutcome::Received(_)
        ));
    }

    #[test]
    fn test_echo_mismatch_rejected() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        h.sim.deliver(&response(&[3, 0x41, 0x0D, 0x55, 0, 0, 0, 0]));

        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Rejected);
        assert_eq!(h.sink.count("Unexpected response: service 0x41 pid 0x0D"), 1);
        assert!(h.poller.retry_pending());
        assert_eq!(h.poller.stats().rejected, 1);
    }

    #[test]
    fn test_short_response_rejected() {
        let mut h = harness(eager());
        h.poller.start().unwrap();
        h.sim.deliver(&response(&[2, 0x41, 0x0C]));

        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Rejected);
    }

    #[test]
    fn test_unfiltered_without_validation_trusts_offsets() {
        let mut h = harness(PollerConfig {
            response_id: None,
            validate_echo: false,
            ..eager()
        });
        h.poller.start().unwrap();
        h.sim
            .deliver(&CanFrame::with_data(0x7E8, &[4, 0x41, 0x0D, 7, 9, 0, 0, 0]).unwrap());

        match h.poller.poll_and_handle_response() {
            PollOutcome::Received(reading) => assert_eq!(reading.bytes(), (7, 9)),
            other => panic!("expected a reading, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_drops_foreign_ids() {
        let mut h = harness(eager());
        h.poller.start().unwrap();

        assert!(!h.sim.deliver(&CanFrame::with_data(0x7E8, &RESPONSE).unwrap()));
        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Waiting);
    }

    #[test]
    fn test_timeout_resends_and_escalates_once() {
        let mut h = harness(PollerConfig {
            response_timeout_ms: 0,
            max_retries: 2,
            ..eager()
        });
        h.poller.start().unwrap();

        assert_eq!(
            h.poller.poll_and_handle_response(),
            PollOutcome::TimedOut { attempt: 1 }
        );
        assert_eq!(
            h.poller.poll_and_handle_response(),
            PollOutcome::TimedOut { attempt: 2 }
        );
        assert_eq!(
            h.poller.poll_and_handle_response(),
            PollOutcome::TimedOut { attempt: 3 }
        );

        assert_eq!(h.sim.transmitted().len(), 4);
        assert_eq!(h.sink.count("No response for PID 12 (attempt 1)"), 1);
        assert_eq!(h.sink.count("ECU silent for PID 12 after 2 attempts"), 1);
        assert_eq!(h.poller.stats().timeouts, 3);
    }

    #[test]
    fn test_pacing_holds_resend() {
        let mut h = harness(PollerConfig {
            min_request_interval_ms: 60_000,
            ..eager()
        });
        h.poller.start().unwrap();
        h.sim.deliver(&response(&RESPONSE));
        h.poller.poll_and_handle_response();

        assert_eq!(h.poller.poll_and_handle_response(), PollOutcome::Waiting);
        assert_eq!(h.sim.transmitted().len(), 1);
    }

    #[test]
    fn test_padding_untouched_by_request() {
        let mut h = harness(eager());
        h.poller.send_request(0x0D);
        h.poller.send_request(0x0C);

        let frame = h.poller.tx_frame();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.bytes(), &[2, 1, 0x0C, 0, 0, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn request_carries_pid(pid in any::<u8>()) {
            let mut h = harness(eager());
            h.poller.send_request(pid);

            let sent = h.sim.transmitted();
            prop_assert_eq!(sent.len(), 1);
            prop_assert_eq!(&sent[0].bytes()[..3], &[2u8, 1, pid][..]);
            let expected = format!("Sending request for PID {}", pid);
            prop_assert_eq!(h.sink.count(&expected), 1);
        }
    }
}

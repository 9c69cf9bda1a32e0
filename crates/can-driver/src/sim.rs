//! Simulated Message-Object Controller
//!
//! Software model of the peripheral used when no hardware is attached:
//! message objects with acceptance filtering, new-data and overrun bits,
//! pending interrupt causes and the status cause. Interrupts are delivered
//! synchronously on the thread that caused the event, which models the
//! handler preempting the main loop at that point.

use crate::controller::{
    CanController, InterruptHandler, MessageSlot, ObjectType, StatusRegister, STATUS_CAUSE,
};
use crate::error::DriverError;
use crate::frame::{CanFrame, Direction, FrameFlags};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

/// Highest bit rate a classic CAN controller accepts
const MAX_BIT_RATE: u32 = 1_000_000;

/// Minimum time quanta per bit the timing generator needs
const MIN_QUANTA_PER_BIT: u32 = 4;

/// Produces the ECU's answer to a transmitted frame
pub type Responder = Box<dyn FnMut(&CanFrame) -> Option<CanFrame> + Send>;

#[derive(Debug, Clone)]
struct MessageObject {
    frame: CanFrame,
    kind: ObjectType,
    /// Acceptance filter latched when the object was loaded
    filter: Option<(u16, u16)>,
    new_data: bool,
    data_lost: bool,
}

#[derive(Debug, Default)]
struct Registers {
    ready_polls_left: Option<u32>,
    initialized: bool,
    enabled: bool,
    interrupts_enabled: bool,
    bit_rate: Option<u32>,
    objects: BTreeMap<MessageSlot, MessageObject>,
    pending: BTreeSet<MessageSlot>,
    status_pending: bool,
    control_status: u32,
    transmitted: Vec<CanFrame>,
    dropped: usize,
    reads: usize,
}

/// In-memory CAN controller
pub struct SimulatedController {
    regs: Mutex<Registers>,
    handler: RwLock<Option<Arc<InterruptHandler>>>,
    responder: Mutex<Option<Responder>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedController").finish_non_exhaustive()
    }
}

impl SimulatedController {
    /// A controller that is ready immediately
    pub fn new() -> Self {
        Self {
            regs: Mutex::new(Registers {
                ready_polls_left: Some(0),
                ..Default::default()
            }),
            handler: RwLock::new(None),
            responder: Mutex::new(None),
        }
    }

    /// A controller that reports ready after `polls` unsuccessful checks
    pub fn with_ready_delay(polls: u32) -> Self {
        let sim = Self::new();
        sim.regs().ready_polls_left = Some(polls);
        sim
    }

    /// A controller whose peripheral never comes up
    pub fn never_ready() -> Self {
        let sim = Self::new();
        sim.regs().ready_polls_left = None;
        sim
    }

    /// Install the remote node answering transmitted frames
    pub fn set_responder(&self, responder: Responder) {
        if let Ok(mut slot) = self.responder.lock() {
            *slot = Some(responder);
        }
    }

    /// Put a frame on the bus as if sent by another node.
    ///
    /// Returns false when no armed receive object accepted it.
    pub fn deliver(&self, frame: &CanFrame) -> bool {
        let accepted = {
            let mut regs = self.regs();
            let target = regs
                .objects
                .iter()
                .filter(|(_, obj)| obj.kind == ObjectType::Rx)
                .find(|(_, obj)| accepts(obj.filter, frame))
                .map(|(slot, _)| *slot);

            match target {
                Some(slot) => {
                    let mut raise = false;
                    if let Some(obj) = regs.objects.get_mut(&slot) {
                        if obj.new_data {
                            obj.data_lost = true;
                        }
                        obj.frame.load_received(frame);
                        obj.new_data = true;
                        raise = obj.frame.flags().contains(FrameFlags::RX_INT_ENABLE);
                    }
                    if raise {
                        regs.pending.insert(slot);
                    }
                    true
                }
                None => {
                    regs.dropped += 1;
                    false
                }
            }
        };

        if accepted {
            self.dispatch();
        }
        accepted
    }

    /// Signal a controller status event with the given control bits
    pub fn raise_status(&self, status: u32) {
        {
            let mut regs = self.regs();
            regs.control_status |= status;
            regs.status_pending = true;
        }
        self.dispatch();
    }

    /// Mark a message object interrupt pending regardless of its configuration
    pub fn raise_object(&self, slot: MessageSlot) {
        self.regs().pending.insert(slot);
        self.dispatch();
    }

    /// Frames handed to transmit objects, oldest first
    pub fn transmitted(&self) -> Vec<CanFrame> {
        self.regs().transmitted.clone()
    }

    /// Frames no receive object accepted
    pub fn dropped(&self) -> usize {
        self.regs().dropped
    }

    /// Number of message object reads
    pub fn reads(&self) -> usize {
        self.regs().reads
    }

    pub fn bit_rate(&self) -> Option<u32> {
        self.regs().bit_rate
    }

    pub fn is_enabled(&self) -> bool {
        let regs = self.regs();
        regs.initialized && regs.enabled
    }

    fn regs(&self) -> MutexGuard<'_, Registers> {
        // Register state stays consistent even if a holder panicked
        self.regs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the interrupt handler once for whatever is pending.
    /// No register lock is held while the handler executes.
    fn dispatch(&self) {
        let handler = {
            let regs = self.regs();
            if !regs.interrupts_enabled || (regs.pending.is_empty() && !regs.status_pending) {
                return;
            }
            match self.handler.read() {
                Ok(guard) => guard.clone(),
                Err(_) => None,
            }
        };

        if let Some(handler) = handler {
            (**handler)(self);
        }
    }

    fn respond(&self, request: &CanFrame) {
        let response = match self.responder.lock() {
            Ok(mut responder) => responder.as_mut().and_then(|r| r(request)),
            Err(_) => None,
        };
        if let Some(response) = response {
            if !self.deliver(&response) {
                debug!("Response {:#05X} not accepted by any object", response.raw_id());
            }
        }
    }
}

fn accepts(filter: Option<(u16, u16)>, frame: &CanFrame) -> bool {
    match filter {
        Some((id, mask)) => frame.matches_filter(id, mask),
        None => true,
    }
}

impl CanController for SimulatedController {
    fn is_ready(&self) -> bool {
        let mut regs = self.regs();
        match regs.ready_polls_left {
            Some(0) => true,
            Some(n) => {
                regs.ready_polls_left = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn init(&self) {
        let mut regs = self.regs();
        regs.initialized = true;
        regs.enabled = false;
        regs.objects.clear();
        regs.pending.clear();
        regs.status_pending = false;
        regs.control_status = 0;
    }

    fn set_bit_rate(&self, clock_hz: u32, bit_rate: u32) -> Result<(), DriverError> {
        if bit_rate == 0
            || bit_rate > MAX_BIT_RATE
            || clock_hz / bit_rate < MIN_QUANTA_PER_BIT
        {
            return Err(DriverError::InvalidBitRate(bit_rate));
        }
        self.regs().bit_rate = Some(bit_rate);
        Ok(())
    }

    fn register_interrupt(&self, handler: InterruptHandler) {
        if let Ok(mut slot) = self.handler.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    fn enable_interrupts(&self) {
        self.regs().interrupts_enabled = true;
    }

    fn enable(&self) {
        self.regs().enabled = true;
    }

    fn set_object(&self, slot: MessageSlot, frame: &CanFrame, kind: ObjectType) {
        let mut stored = *frame;
        match kind {
            ObjectType::Tx => {
                stored.set_direction(Direction::Tx);
                let raise = {
                    let mut regs = self.regs();
                    regs.transmitted.push(stored);
                    regs.objects.insert(
                        slot,
                        MessageObject {
                            frame: stored,
                            kind,
                            filter: None,
                            new_data: false,
                            data_lost: false,
                        },
                    );
                    let raise = stored.flags().contains(FrameFlags::TX_INT_ENABLE);
                    if raise {
                        regs.pending.insert(slot);
                    }
                    raise
                };
                if raise {
                    self.dispatch();
                }
                self.respond(&stored);
            }
            ObjectType::Rx => {
                stored.set_direction(Direction::Rx);
                let filter = stored
                    .flags()
                    .contains(FrameFlags::USE_ID_FILTER)
                    .then(|| (stored.raw_id(), stored.id_mask()));
                self.regs().objects.insert(
                    slot,
                    MessageObject {
                        frame: stored,
                        kind,
                        filter,
                        new_data: false,
                        data_lost: false,
                    },
                );
            }
        }
    }

    fn get_object(&self, slot: MessageSlot, frame: &mut CanFrame, clear_pending: bool) {
        let mut regs = self.regs();
        regs.reads += 1;
        let Some(obj) = regs.objects.get_mut(&slot) else {
            return;
        };

        frame.load_received(&obj.frame);
        let mut flags = frame.flags();
        flags.set(FrameFlags::DATA_LOST, obj.data_lost);
        frame.set_flags(flags);

        if clear_pending {
            obj.new_data = false;
            obj.data_lost = false;
            regs.pending.remove(&slot);
        }
    }

    fn interrupt_cause(&self) -> u32 {
        let regs = self.regs();
        if regs.status_pending {
            STATUS_CAUSE
        } else {
            regs.pending
                .iter()
                .next()
                .map(|slot| slot.get() as u32)
                .unwrap_or(0)
        }
    }

    fn clear_interrupt(&self, slot: MessageSlot) {
        self.regs().pending.remove(&slot);
    }

    fn status(&self, register: StatusRegister) -> u32 {
        let mut regs = self.regs();
        match register {
            StatusRegister::Control => {
                regs.status_pending = false;
                regs.control_status
            }
            StatusRegister::NewData => regs
                .objects
                .iter()
                .filter(|(_, obj)| obj.new_data)
                .fold(0, |acc, (slot, _)| acc | 1 << (slot.get() - 1)),
        }
    }
}

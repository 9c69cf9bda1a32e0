//! Interrupt Classifier and Pending-Operation Flags
//!
//! The classifier runs in interrupt context. It reads the cause register
//! once per invocation and turns it into flag updates the main loop
//! consumes. Each flag has a single writer (the interrupt) raising it and a
//! single reader (the main loop) taking it, so plain atomics suffice.

use crate::controller::{CanController, InterruptCause, MessageSlot, StatusRegister};
use crate::report::Reporter;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Flags shared between the interrupt handler and the main loop
#[derive(Debug, Default)]
pub struct PendingFlags {
    rx_ready: AtomicBool,
    tx_complete: AtomicBool,
    error: AtomicBool,
}

impl PendingFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_rx(&self) {
        self.rx_ready.store(true, Ordering::Release);
    }

    pub fn raise_tx(&self) {
        self.tx_complete.store(true, Ordering::Release);
    }

    pub fn raise_error(&self) {
        self.error.store(true, Ordering::Release);
    }

    pub fn clear_error(&self) {
        self.error.store(false, Ordering::Release);
    }

    /// Consume the receive-ready flag; true at most once per raise
    pub fn take_rx(&self) -> bool {
        self.rx_ready.swap(false, Ordering::AcqRel)
    }

    /// Consume the transmit-complete flag
    pub fn take_tx(&self) -> bool {
        self.tx_complete.swap(false, Ordering::AcqRel)
    }

    pub fn rx_pending(&self) -> bool {
        self.rx_ready.load(Ordering::Acquire)
    }

    pub fn tx_pending(&self) -> bool {
        self.tx_complete.load(Ordering::Acquire)
    }

    /// Whether a bus/status error is currently flagged
    pub fn error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }
}

/// Branch taken by one classifier invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Status/error event; carries the control status read
    Status(u32),
    /// Receive completed on the RX object
    Received,
    /// Transmit completed on the TX object
    Transmitted,
    /// Cause matched nothing this node configured
    Unexpected(InterruptCause),
}

/// Routes controller interrupt causes to the pending flags
#[derive(Debug)]
pub struct InterruptClassifier {
    rx_slot: MessageSlot,
    tx_slot: Option<MessageSlot>,
    flags: Arc<PendingFlags>,
    reporter: Reporter,
    last_status: AtomicU32,
}

impl InterruptClassifier {
    /// `tx_slot` is `None` when transmit completions are not interrupt-driven
    pub fn new(
        rx_slot: MessageSlot,
        tx_slot: Option<MessageSlot>,
        flags: Arc<PendingFlags>,
        reporter: Reporter,
    ) -> Self {
        Self {
            rx_slot,
            tx_slot,
            flags,
            reporter,
            last_status: AtomicU32::new(0),
        }
    }

    /// Handle one interrupt
    pub fn on_interrupt(&self, controller: &dyn CanController) -> InterruptOutcome {
        let cause = InterruptCause::from(controller.interrupt_cause());

        match cause {
            InterruptCause::Status => {
                // Reading the control register also acknowledges the interrupt
                let status = controller.status(StatusRegister::Control);
                self.last_status.store(status, Ordering::Relaxed);
                self.flags.raise_error();
                InterruptOutcome::Status(status)
            }
            InterruptCause::Object(slot) if slot == self.rx_slot => {
                controller.clear_interrupt(slot);
                self.flags.raise_rx();
                self.flags.clear_error();
                InterruptOutcome::Received
            }
            InterruptCause::Object(slot) if Some(slot) == self.tx_slot => {
                controller.clear_interrupt(slot);
                self.flags.raise_tx();
                self.flags.clear_error();
                InterruptOutcome::Transmitted
            }
            other => {
                trace!("Unclassified CAN interrupt cause: {:?}", other);
                self.reporter.unexpected_interrupt();
                InterruptOutcome::Unexpected(other)
            }
        }
    }

    /// Control status captured by the most recent status interrupt
    pub fn last_status(&self) -> u32 {
        self.last_status.load(Ordering::Relaxed)
    }

    pub fn flags(&self) -> &Arc<PendingFlags> {
        &self.flags
    }
}

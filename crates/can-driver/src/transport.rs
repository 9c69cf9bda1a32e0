//! CAN Transport Binding
//!
//! Thin adapter over a [`CanController`]: bring-up, interrupt installation,
//! and the send/arm/fetch calls the protocol layer needs. Frames are only
//! borrowed for the duration of each call.

use crate::controller::{BusConfig, CanController, InterruptCause, MessageSlot, ObjectType};
use crate::error::DriverError;
use crate::frame::{CanFrame, FrameFlags};
use crate::interrupt::InterruptClassifier;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Safe wrapper around a message-object CAN controller
pub struct CanTransport<C: CanController> {
    controller: Arc<C>,
}

impl<C: CanController> Clone for CanTransport<C> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

impl<C: CanController + 'static> CanTransport<C> {
    pub fn new(controller: Arc<C>) -> Self {
        Self { controller }
    }

    /// One-time controller bring-up.
    ///
    /// Waits (bounded) for the peripheral, programs bit timing, installs
    /// `classifier` as the interrupt handler and joins the bus.
    pub fn configure(
        &self,
        config: &BusConfig,
        classifier: Arc<InterruptClassifier>,
    ) -> Result<(), DriverError> {
        let mut attempts = 0;
        while !self.controller.is_ready() {
            attempts += 1;
            if attempts >= config.ready_attempts {
                error!("CAN peripheral not ready after {} polls", attempts);
                return Err(DriverError::PeripheralNotReady { attempts });
            }
            std::hint::spin_loop();
        }

        self.controller.init();
        self.controller
            .set_bit_rate(config.clock_hz, config.bit_rate)?;
        self.controller
            .register_interrupt(Box::new(move |controller: &dyn CanController| {
                classifier.on_interrupt(controller);
            }));
        self.controller.enable_interrupts();
        self.controller.enable();

        info!(
            "CAN controller configured: {} bit/s from {} Hz clock",
            config.bit_rate, config.clock_hz
        );
        Ok(())
    }

    /// Arm `slot` to accept frames matching `id_filter`/`id_mask` into
    /// `buffer`, raising an interrupt on each match.
    pub fn arm_receive(
        &self,
        slot: MessageSlot,
        id_filter: u16,
        id_mask: u16,
        buffer: &mut CanFrame,
    ) -> Result<(), DriverError> {
        buffer.set_id(id_filter)?;
        buffer.set_id_mask(id_mask);
        buffer.set_flags(FrameFlags::RX_INT_ENABLE | FrameFlags::USE_ID_FILTER);
        self.controller.set_object(slot, buffer, ObjectType::Rx);
        debug!(
            "Armed RX object {} with filter {:#05X}/{:#05X}",
            slot.get(),
            id_filter,
            id_mask
        );
        Ok(())
    }

    /// Load `frame` into a transmit object; completion is signalled by interrupt
    pub fn transmit(&self, slot: MessageSlot, frame: &CanFrame) {
        self.controller.set_object(slot, frame, ObjectType::Tx);
    }

    /// Copy the received frame of `slot` into `frame` and clear the
    /// peripheral's new-data state. Overrun shows up as `DATA_LOST`.
    pub fn fetch(&self, slot: MessageSlot, frame: &mut CanFrame) {
        self.controller.get_object(slot, frame, true);
    }

    /// Decoded interrupt cause; interrupt context only
    pub fn interrupt_cause(&self) -> InterruptCause {
        InterruptCause::from(self.controller.interrupt_cause())
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }
}

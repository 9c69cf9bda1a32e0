//! CAN Frame / Message Object Model
//!
//! A [`CanFrame`] doubles as the message-object descriptor handed to the
//! controller: identifier, acceptance mask, declared length, payload and
//! the control flags the peripheral reads and reports.

use crate::error::DriverError;
use bitflags::bitflags;
use embedded_can::{Id, StandardId};

/// Maximum classic CAN payload length
pub const MAX_DLC: usize = 8;

/// Mask comparing all 11 identifier bits
pub const STANDARD_ID_MASK: u16 = 0x7FF;

bitflags! {
    /// Message object control flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Raise an interrupt when the transmission completes.
        const TX_INT_ENABLE = 0x01;
        /// Raise an interrupt when a matching frame is received.
        const RX_INT_ENABLE = 0x02;
        /// Apply the identifier mask for acceptance filtering.
        const USE_ID_FILTER = 0x04;
        /// A received frame overwrote one that was never read.
        const DATA_LOST = 0x08;
    }
}

/// Direction a message object is dedicated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Tx,
    Rx,
}

/// A classic CAN frame with 11-bit addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: StandardId,
    id_mask: u16,
    len: u8,
    data: [u8; MAX_DLC],
    direction: Direction,
    flags: FrameFlags,
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            id: StandardId::ZERO,
            id_mask: 0,
            len: 0,
            data: [0; MAX_DLC],
            direction: Direction::Tx,
            flags: FrameFlags::empty(),
        }
    }
}

impl CanFrame {
    /// Create a zero-filled transmit frame with a declared length
    pub fn tx(id: u16, len: usize) -> Result<Self, DriverError> {
        if len > MAX_DLC {
            return Err(DriverError::PayloadTooLong(len));
        }
        Ok(Self {
            id: standard_id(id)?,
            len: len as u8,
            ..Default::default()
        })
    }

    /// Create an empty receive buffer accepting up to 8 bytes
    pub fn rx() -> Self {
        Self {
            len: MAX_DLC as u8,
            direction: Direction::Rx,
            ..Default::default()
        }
    }

    /// Create a frame carrying the given payload
    pub fn with_data(id: u16, data: &[u8]) -> Result<Self, DriverError> {
        let mut frame = Self::tx(id, data.len())?;
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// Raw 11-bit identifier
    pub fn raw_id(&self) -> u16 {
        self.id.as_raw()
    }

    pub fn set_id(&mut self, id: u16) -> Result<(), DriverError> {
        self.id = standard_id(id)?;
        Ok(())
    }

    /// Acceptance mask (0 accepts any identifier)
    pub fn id_mask(&self) -> u16 {
        self.id_mask
    }

    pub fn set_id_mask(&mut self, mask: u16) {
        self.id_mask = mask & STANDARD_ID_MASK;
    }

    /// Declared payload length
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) -> Result<(), DriverError> {
        if len > MAX_DLC {
            return Err(DriverError::PayloadTooLong(len));
        }
        self.len = len as u8;
        Ok(())
    }

    /// Payload up to the declared length
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Full 8-byte backing buffer, independent of the declared length
    pub fn bytes(&self) -> &[u8; MAX_DLC] {
        &self.data
    }

    /// Mutable access to the backing buffer for in-place rewrites
    pub fn bytes_mut(&mut self) -> &mut [u8; MAX_DLC] {
        &mut self.data
    }

    /// Byte at `index`, or `None` beyond the declared length
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.payload().get(index).copied()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags;
    }

    /// Whether the controller reported an overrun on the last fetch
    pub fn data_lost(&self) -> bool {
        self.flags.contains(FrameFlags::DATA_LOST)
    }

    /// Whether this frame's identifier passes the given acceptance filter
    pub fn matches_filter(&self, filter_id: u16, mask: u16) -> bool {
        (self.raw_id() & mask) == (filter_id & mask)
    }

    /// Copy a received frame into this buffer, keeping its RX configuration.
    /// Bytes beyond the received length are left untouched.
    pub(crate) fn load_received(&mut self, received: &CanFrame) {
        let len = received.len();
        self.id = received.id;
        self.len = len as u8;
        self.data[..len].copy_from_slice(received.payload());
    }
}

fn standard_id(raw: u16) -> Result<StandardId, DriverError> {
    StandardId::new(raw).ok_or(DriverError::InvalidId(raw))
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        match id.into() {
            Id::Standard(id) => Self::with_data(id.as_raw(), data).ok(),
            Id::Extended(_) => None,
        }
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        // OBD-II diagnostic traffic never uses remote frames
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        Id::Standard(self.id)
    }

    fn dlc(&self) -> usize {
        self.len()
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_wide_identifier() {
        assert_eq!(CanFrame::tx(0x800, 8), Err(DriverError::InvalidId(0x800)));
        assert!(CanFrame::tx(0x7FF, 8).is_ok());
    }

    #[test]
    fn test_rejects_long_payload() {
        assert_eq!(
            CanFrame::with_data(0x7DF, &[0; 9]),
            Err(DriverError::PayloadTooLong(9))
        );
    }

    #[test]
    fn test_zero_mask_accepts_anything() {
        let frame = CanFrame::with_data(0x123, &[1]).unwrap();
        assert!(frame.matches_filter(0, 0));
        assert!(!frame.matches_filter(0x7E7, STANDARD_ID_MASK));
    }

    #[test]
    fn test_load_received_keeps_tail() {
        let mut buffer = CanFrame::rx();
        buffer.bytes_mut().copy_from_slice(&[9; 8]);
        let short = CanFrame::with_data(0x7E8, &[1, 2, 3]).unwrap();

        buffer.load_received(&short);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.bytes(), &[1, 2, 3, 9, 9, 9, 9, 9]);
        assert_eq!(buffer.direction(), Direction::Rx);
        assert_eq!(buffer.byte(3), None);
    }

    #[test]
    fn test_embedded_can_interop() {
        use embedded_can::Frame;

        let id = StandardId::new(0x7DF).unwrap();
        let frame = <CanFrame as Frame>::new(id, &[2, 1, 0x0C]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(Frame::data(&frame), &[2, 1, 0x0C]);
        assert!(!frame.is_extended());
    }

    proptest! {
        #[test]
        fn standard_frames_match_own_id(
            id in 0u16..=STANDARD_ID_MASK,
            data in proptest::collection::vec(any::<u8>(), 0..=MAX_DLC),
        ) {
            let frame = CanFrame::with_data(id, &data).unwrap();
            prop_assert_eq!(frame.payload(), &data[..]);
            prop_assert!(frame.matches_filter(id, STANDARD_ID_MASK));
        }
    }
}

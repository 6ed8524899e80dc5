//! Builder for the single ISO-TP style frames exchanged during security access
//!
//! Only single frame construction is handled here. No segmentation or reassembly takes place,
//! the handshakes borrow the First, Consecutive and Flow-Control PCI codes as plain
//! sub-command carriers.

use crate::{AuthError, AuthResult};

/// Maximum number of payload bytes after the PCI byte
pub const MAX_PAYLOAD: usize = 7;

/// ISO-TP frame type, stored in the high nibble of the PCI byte
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FrameType {
    /// Single frame
    Single = 0x0,
    /// First frame of a segmented message
    First = 0x1,
    /// Consecutive frame of a segmented message
    Consecutive = 0x2,
    /// Flow control frame
    FlowControl = 0x3,
}

impl FrameType {
    /// Decodes the frame type from a PCI byte.
    /// Returns None for the reserved codes 0x4-0xF
    pub fn from_pci(pci: u8) -> Option<Self> {
        match pci >> 4 {
            0x0 => Some(FrameType::Single),
            0x1 => Some(FrameType::First),
            0x2 => Some(FrameType::Consecutive),
            0x3 => Some(FrameType::FlowControl),
            _ => None,
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> Self {
        ft as u8
    }
}

/// Packs a frame type and a control nibble into a PCI byte.
///
/// The meaning of `control` depends on the frame type (length, sequence number or
/// flow status), and each handshake uses its own convention, so it is passed through as is.
/// Only the low 4 bits of `control` are used.
pub const fn pci(frame_type: FrameType, control: u8) -> u8 {
    ((frame_type as u8) << 4) | (control & 0x0F)
}

/// A single transport frame addressed to an ECU
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    target_id: u32,
    data: [u8; 8],
    dlc: u8,
}

impl Frame {
    /// Creates a frame from a raw PCI byte and payload
    ///
    /// ## Parameters
    /// * target_id - CAN ID of the ECU
    /// * pci - Packed PCI byte. See [pci]
    /// * payload - Up to [MAX_PAYLOAD] bytes following the PCI byte
    pub fn new(target_id: u32, pci: u8, payload: &[u8]) -> AuthResult<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(AuthError::PayloadTooLong(payload.len()));
        }
        let mut data = [0u8; 8];
        data[0] = pci;
        data[1..1 + payload.len()].copy_from_slice(payload);
        Ok(Self {
            target_id,
            data,
            dlc: (payload.len() + 1) as u8,
        })
    }

    /// Creates a frame from its frame type and control nibble
    pub fn with_type(
        target_id: u32,
        frame_type: FrameType,
        control: u8,
        payload: &[u8],
    ) -> AuthResult<Self> {
        if control > 0x0F {
            return Err(AuthError::InvalidControlNibble(control));
        }
        Self::new(target_id, pci(frame_type, control), payload)
    }

    /// Parses a frame received from the bus. `data` holds the PCI byte followed by the payload
    pub fn decode(target_id: u32, data: &[u8]) -> AuthResult<Self> {
        let (pci, payload) = data.split_first().ok_or(AuthError::EmptyFrame)?;
        Self::new(target_id, *pci, payload)
    }

    /// CAN ID of the frame
    pub fn target_id(&self) -> u32 {
        self.target_id
    }

    /// Raw PCI byte
    pub fn pci(&self) -> u8 {
        self.data[0]
    }

    /// Frame type encoded in the PCI byte, if it is a valid ISO-TP type
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_pci(self.data[0])
    }

    /// Low nibble of the PCI byte
    pub fn control(&self) -> u8 {
        self.data[0] & 0x0F
    }

    /// Payload bytes after the PCI byte
    pub fn payload(&self) -> &[u8] {
        &self.data[1..self.dlc as usize]
    }

    /// PCI byte followed by the payload, exactly as transmitted
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Number of data bytes on the wire (PCI byte included)
    pub fn dlc(&self) -> u8 {
        self.dlc
    }
}

/// Reads the big endian seed which follows the sub-command byte of a payload
pub fn seed_from_payload(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.get(1..5)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

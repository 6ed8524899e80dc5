//! Module for the bus collaborator the security access sequencers write to
//!
//! The sequencers only need two primitives, which are described by [BusSession]:
//! * Write a single frame to an ECU
//! * Ask the session owner to keep a unlocked ECU awake with tester present messages
//!
//! [CanBusSession] provides both primitives on top of any raw [CanChannel].

use automotive_diag::uds::UdsCommand;
use log::debug;

use crate::frame::{pci, Frame, FrameType};

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, thiserror::Error)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// Underlying IO Error with channel
    #[error("IO error")]
    IOError(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// Timeout when writing data to the channel
    #[error("timeout writing to channel")]
    WriteTimeout,
    /// The channels Tx buffer is full (Bus busy or lost arbitration)
    #[error("channel's Transmit buffer is full")]
    BufferFull,
    /// The interface is not open
    #[error("channel's interface is not open")]
    InterfaceNotOpen,
    /// Underlying API error with hardware
    #[error("underlying {api_name} API error ({code}): {desc}")]
    APIError {
        /// Name of the API EG: 'socketCAN', 'Passthru'
        api_name: String,
        /// Internal API error code
        code: u8,
        /// API error description
        desc: String,
    },
    /// Other channel error
    #[error("{0}")]
    Other(String),
}

/// Raw CAN 2.0 frame
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CanFrame {
    id: u32,
    dlc: u8,
    data: [u8; 8],
    ext: bool,
}

impl CanFrame {
    /// Creates a new CAN Frame. Only the first 8 bytes of `data` are used
    pub fn new(id: u32, data: &[u8], is_ext: bool) -> Self {
        let dlc = data.len().min(8);
        let mut buf = [0u8; 8];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            ext: is_ext,
        }
    }

    /// CAN ID of the frame
    pub fn get_address(&self) -> u32 {
        self.id
    }

    /// Data bytes of the frame
    pub fn get_data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// True if the frame uses a 29bit identifier
    pub fn is_extended(&self) -> bool {
        self.ext
    }
}

impl From<&Frame> for CanFrame {
    fn from(f: &Frame) -> Self {
        CanFrame::new(f.target_id(), f.as_bytes(), f.target_id() > 0x7FF)
    }
}

/// Raw CAN channel. Implemented by whatever owns the physical bus
pub trait CanChannel: Send + Sync {
    /// Attempts to write CAN frames to the bus
    ///
    /// ## Parameters
    /// * packets - Frames to write, in order
    /// * timeout_ms - Timeout for writing. If a value of 0 is used, it tells the channel to write without checking if
    ///   data was actually written.
    fn write_packets(&mut self, packets: Vec<CanFrame>, timeout_ms: u32) -> ChannelResult<()>;
}

/// The primitives a security access sequencer needs from the session that owns the bus
pub trait BusSession {
    /// Transmits one frame
    fn write(&mut self, frame: &Frame) -> ChannelResult<()>;

    /// Requests tester present keep-alive messages for an ECU. Sent once a handshake that
    /// requires it completes
    fn send_keepalive(&mut self, target_id: u32) -> ChannelResult<()>;
}

/// Sub function of the tester present request (response required)
pub const TESTER_PRESENT_SUB_FUNCTION: u8 = 0x00;

/// Builds the single frame UDS tester present request for an ECU
pub fn tester_present_frame(target_id: u32) -> CanFrame {
    CanFrame::new(
        target_id,
        &[
            pci(FrameType::Single, 2),
            UdsCommand::TesterPresent as u8,
            TESTER_PRESENT_SUB_FUNCTION,
            0,
            0,
            0,
            0,
            0,
        ],
        target_id > 0x7FF,
    )
}

/// [BusSession] on top of a raw [CanChannel]
#[derive(Debug)]
pub struct CanBusSession<C: CanChannel> {
    channel: C,
    write_timeout_ms: u32,
}

impl<C: CanChannel> CanBusSession<C> {
    /// Wraps a CAN channel
    ///
    /// ## Parameters
    /// * channel - Raw CAN channel to write to
    /// * write_timeout_ms - Passed to [CanChannel::write_packets] for each frame
    pub fn new(channel: C, write_timeout_ms: u32) -> Self {
        Self {
            channel,
            write_timeout_ms,
        }
    }

    /// Returns the wrapped channel
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Borrows the wrapped channel
    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C: CanChannel> BusSession for CanBusSession<C> {
    fn write(&mut self, frame: &Frame) -> ChannelResult<()> {
        debug!(
            "Out -> 0x{:04X} {:02X?}",
            frame.target_id(),
            frame.as_bytes()
        );
        self.channel
            .write_packets(vec![CanFrame::from(frame)], self.write_timeout_ms)
    }

    fn send_keepalive(&mut self, target_id: u32) -> ChannelResult<()> {
        debug!("Tester present -> 0x{target_id:04X}");
        self.channel
            .write_packets(vec![tester_present_frame(target_id)], self.write_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationCanChannel;

    #[test]
    fn can_frame_truncates() {
        let f = CanFrame::new(0x7E0, &[1, 2, 3, 4, 5, 6, 7, 8, 9], false);
        assert_eq!(f.get_data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(f.get_address(), 0x7E0);
        assert!(!f.is_extended());
    }

    #[test]
    fn write_keeps_exact_length() {
        let channel = SimulationCanChannel::new();
        let mut session = CanBusSession::new(channel.clone(), 100);
        let frame = Frame::new(0x776, 0x10, &[0x01]).unwrap();
        session.write(&frame).unwrap();
        let sent = channel.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_address(), 0x776);
        assert_eq!(sent[0].get_data(), &[0x10, 0x01]);
    }

    #[test]
    fn keepalive_is_tester_present() {
        let channel = SimulationCanChannel::new();
        let mut session = CanBusSession::new(channel.clone(), 100);
        session.send_keepalive(0x740).unwrap();
        let sent = channel.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_address(), 0x740);
        assert_eq!(sent[0].get_data(), &[0x02, 0x3E, 0x00, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn write_failure_is_reported() {
        let channel = SimulationCanChannel::new();
        channel.set_fail_writes(true);
        let mut session = CanBusSession::new(channel.clone(), 100);
        let frame = Frame::new(0x776, 0x10, &[0x01]).unwrap();
        assert!(matches!(session.write(&frame), Err(ChannelError::BufferFull)));
        assert!(channel.sent_frames().is_empty());
    }
}

//! Routes frames received from the bus to the GWM and BCM sequencers
//!
//! This is the boundary between raw CAN traffic and the handshakes. Frames are matched to
//! a sequencer by the ID the ECU responds on, and their PCI byte is decoded here, so the sequencers
//! only ever see a frame type and a bounded payload.

use log::debug;

use crate::{
    channel::BusSession,
    frame::{Frame, FrameType},
    sequencer::{EcuKind, Sequencer, SequencerOptions, StepOutcome},
    AuthError, AuthResult,
};

/// Dispatcher configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatcherOptions {
    /// Gateway module sequencer options
    pub gwm: SequencerOptions,
    /// Body control module sequencer options
    pub bcm: SequencerOptions,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            gwm: SequencerOptions::gwm(),
            bcm: SequencerOptions::bcm(),
        }
    }
}

/// Owns one sequencer per ECU and feeds them inbound frames
#[derive(Debug, Clone)]
pub struct Dispatcher {
    gwm: Sequencer,
    bcm: Sequencer,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherOptions::default())
    }
}

impl Dispatcher {
    /// Creates a dispatcher with idle sequencers
    pub fn new(options: DispatcherOptions) -> Self {
        Self {
            gwm: Sequencer::new(EcuKind::Gwm, options.gwm),
            bcm: Sequencer::new(EcuKind::Bcm, options.bcm),
        }
    }

    /// Sequencer of an ECU
    pub fn sequencer(&self, ecu: EcuKind) -> &Sequencer {
        match ecu {
            EcuKind::Gwm => &self.gwm,
            EcuKind::Bcm => &self.bcm,
        }
    }

    fn sequencer_mut(&mut self, ecu: EcuKind) -> &mut Sequencer {
        match ecu {
            EcuKind::Gwm => &mut self.gwm,
            EcuKind::Bcm => &mut self.bcm,
        }
    }

    /// Looks up the sequencer which listens on `rx_id`
    fn sequencer_for_rx(&mut self, rx_id: u32) -> Option<&mut Sequencer> {
        [&mut self.gwm, &mut self.bcm]
            .into_iter()
            .find(|s| s.options().rx_id == rx_id)
    }

    /// True once the ECU has been unlocked
    pub fn is_unlocked(&self, ecu: EcuKind) -> bool {
        self.sequencer(ecu).is_complete()
    }

    /// Starts the handshake of an ECU
    pub fn begin<B: BusSession + ?Sized>(&mut self, ecu: EcuKind, bus: &mut B) -> AuthResult<()> {
        self.sequencer_mut(ecu).begin(bus)
    }

    /// Resets both sequencers, for example when the bus goes down
    pub fn reset(&mut self) {
        self.gwm.reset();
        self.bcm.reset();
    }

    /// Delivers an already decoded frame to the sequencer listening on `rx_id`
    ///
    /// ## Returns
    /// [AuthError::UnknownTarget] if no sequencer listens on `rx_id`
    pub fn on_frame<B: BusSession + ?Sized>(
        &mut self,
        bus: &mut B,
        rx_id: u32,
        frame_type: FrameType,
        payload: &[u8],
    ) -> AuthResult<StepOutcome> {
        self.sequencer_for_rx(rx_id)
            .ok_or(AuthError::UnknownTarget(rx_id))?
            .on_frame(bus, frame_type, payload)
    }

    /// Delivers a raw CAN frame, PCI byte included
    ///
    /// ## Returns
    /// * `Ok(None)` if the frame is not from a managed ECU
    /// * [StepOutcome::Ignored] if the frame is not a First, Consecutive or Flow-Control frame
    /// * [AuthError::EmptyFrame] if a managed ECU sent a frame without data
    pub fn on_can_frame<B: BusSession + ?Sized>(
        &mut self,
        bus: &mut B,
        rx_id: u32,
        data: &[u8],
    ) -> AuthResult<Option<StepOutcome>> {
        let Some(seq) = self.sequencer_for_rx(rx_id) else {
            return Ok(None);
        };
        let frame = Frame::decode(rx_id, data)?;
        match frame.frame_type() {
            Some(ft @ (FrameType::First | FrameType::Consecutive | FrameType::FlowControl)) => {
                seq.on_frame(bus, ft, frame.payload()).map(Some)
            }
            _ => {
                debug!(
                    "{} ignoring non handshake frame {:02X?}",
                    seq.ecu(),
                    frame.as_bytes()
                );
                Ok(Some(StepOutcome::Ignored))
            }
        }
    }
}

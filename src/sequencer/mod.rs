//! Module for the security access handshake state machines
//!
//! Both ECUs follow a fixed script of request/response pairs. Rather than hand coding each
//! script, a handshake is described by a [StepTable], and a single [Sequencer] engine walks the table
//! one inbound frame at a time. See [GWM_TABLE] and [BCM_TABLE] for the two scripts.
//!
//! A step only fires if the inbound frame type and its first payload byte (the sub-command)
//! match the step's [Trigger] exactly. Anything else is treated as unrelated bus traffic and ignored.

use log::{debug, error, info, warn};
use strum_macros::{Display, EnumIter};

use crate::{
    channel::BusSession,
    frame::{seed_from_payload, Frame, FrameType, MAX_PAYLOAD},
    transform::SecurityTransform,
    AuthError, AuthResult,
};

mod bcm;
mod gwm;

#[cfg(test)]
mod test_bus;

pub use bcm::*;
pub use gwm::*;

/// Payload length of a frame carrying a seed (sub-command + 4 byte seed)
pub const SEED_PAYLOAD_LEN: usize = 5;

/// ECU guarded by a security access handshake
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EcuKind {
    /// Gateway module
    #[strum(to_string = "GWM")]
    Gwm,
    /// Body control module
    #[strum(to_string = "BCM")]
    Bcm,
}

impl EcuKind {
    /// Handshake script of the ECU
    pub fn table(self) -> &'static StepTable {
        match self {
            EcuKind::Gwm => &GWM_TABLE,
            EcuKind::Bcm => &BCM_TABLE,
        }
    }

    /// Default CAN IDs of the ECU
    pub fn default_options(self) -> SequencerOptions {
        match self {
            EcuKind::Gwm => SequencerOptions::gwm(),
            EcuKind::Bcm => SequencerOptions::bcm(),
        }
    }
}

/// What to do with the handshake state when a reply could not be transmitted
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteFailurePolicy {
    /// Advance as if the reply had been sent. This is how the vehicle module has always behaved
    #[default]
    Advance,
    /// Stay on the current step, so that a repeat of the ECU's frame triggers the reply again
    Hold,
}

/// Sequencer configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequencerOptions {
    /// CAN ID the ECU listens on
    pub tx_id: u32,
    /// CAN ID the ECU responds with
    pub rx_id: u32,
    /// Behaviour when the bus refuses a frame
    pub write_failure_policy: WriteFailurePolicy,
}

impl SequencerOptions {
    /// MG ZS EV gateway module IDs
    pub fn gwm() -> Self {
        Self {
            tx_id: 0x776,
            rx_id: 0x77E,
            write_failure_policy: WriteFailurePolicy::default(),
        }
    }

    /// MG ZS EV body control module IDs
    pub fn bcm() -> Self {
        Self {
            tx_id: 0x740,
            rx_id: 0x748,
            write_failure_policy: WriteFailurePolicy::default(),
        }
    }
}

/// Sub-command match of a [Trigger]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubCode {
    /// First payload byte must equal this value
    Exact(u8),
    /// Any payload, including an empty one
    Any,
}

/// Inbound frame which advances a step
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Frame type of the inbound frame
    pub frame_type: FrameType,
    /// Sub-command of the inbound frame
    pub sub: SubCode,
}

impl Trigger {
    /// Matches `frame_type` frames with a first payload byte of `sub`
    pub const fn exact(frame_type: FrameType, sub: u8) -> Self {
        Self {
            frame_type,
            sub: SubCode::Exact(sub),
        }
    }

    /// Matches every `frame_type` frame
    pub const fn any(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            sub: SubCode::Any,
        }
    }

    /// Checks an inbound frame against the trigger
    pub fn matches(&self, frame_type: FrameType, payload: &[u8]) -> bool {
        if frame_type != self.frame_type {
            return false;
        }
        match self.sub {
            SubCode::Exact(sub) => payload.first() == Some(&sub),
            SubCode::Any => true,
        }
    }
}

/// Fixed reply frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reply {
    /// PCI byte
    pub pci: u8,
    /// Sub-command, first payload byte
    pub sub: u8,
    /// Bytes following the sub-command
    pub extra: &'static [u8],
}

impl Reply {
    /// Builds the reply for an ECU
    pub fn build(&self, target_id: u32) -> AuthResult<Frame> {
        let len = 1 + self.extra.len();
        if len > MAX_PAYLOAD {
            return Err(AuthError::PayloadTooLong(len));
        }
        let mut payload = [0u8; MAX_PAYLOAD];
        payload[0] = self.sub;
        payload[1..len].copy_from_slice(self.extra);
        Frame::new(target_id, self.pci, &payload[..len])
    }
}

/// What a step does once its trigger matched
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a fixed frame
    Reply(Reply),
    /// Read the seed from the inbound frame, and send back the key
    ReplyWithKey {
        /// PCI byte of the reply
        pci: u8,
        /// Sub-command of the reply, followed by the 4 key bytes
        sub: u8,
        /// Transform producing the key
        transform: SecurityTransform,
    },
    /// Hand the ECU over to the tester present keep-alive
    KeepAlive,
    /// Nothing left to send, the ECU is unlocked
    Complete,
}

/// One row of a handshake script
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Step {
    /// Short name, used for logging
    pub name: &'static str,
    /// Frame which fires the step
    pub trigger: Trigger,
    /// Action taken when fired
    pub action: Action,
}

/// Complete handshake script of an ECU
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StepTable {
    /// ECU the script unlocks
    pub ecu: EcuKind,
    /// Frame sent by [Sequencer::begin]
    pub start: Reply,
    /// Steps, in handshake order
    pub steps: &'static [Step],
}

/// Position of a sequencer within its script
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// No handshake started
    Idle,
    /// Waiting for the trigger of the step at this index
    Awaiting(usize),
    /// Handshake finished
    Complete,
}

/// Result of feeding a frame to a [Sequencer]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Frame did not match the current step
    Ignored,
    /// Step fired and this reply was written
    Sent(Frame),
    /// Step fired and a keep-alive was requested for this ID
    KeepAliveSent(u32),
    /// Final step fired, nothing was sent
    Completed,
}

/// Security access state machine for a single ECU
#[derive(Debug, Clone)]
pub struct Sequencer {
    table: &'static StepTable,
    options: SequencerOptions,
    state: SessionState,
}

impl Sequencer {
    /// Creates a sequencer for one of the known ECUs
    pub fn new(ecu: EcuKind, options: SequencerOptions) -> Self {
        Self::with_table(ecu.table(), options)
    }

    /// Creates a sequencer running a custom script
    pub fn with_table(table: &'static StepTable, options: SequencerOptions) -> Self {
        Self {
            table,
            options,
            state: SessionState::Idle,
        }
    }

    /// ECU driven by the sequencer
    pub fn ecu(&self) -> EcuKind {
        self.table.ecu
    }

    /// Sequencer configuration
    pub fn options(&self) -> &SequencerOptions {
        &self.options
    }

    /// Current position in the handshake
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Step the sequencer is waiting on, if a handshake is in progress
    pub fn current_step(&self) -> Option<&'static Step> {
        match self.state {
            SessionState::Awaiting(idx) => self.table.steps.get(idx),
            _ => None,
        }
    }

    /// True once the ECU has been unlocked
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    /// Forgets any handshake in progress. Used when the bus connection is torn down
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
    }

    /// Starts (or restarts) the handshake by sending the script's first frame
    pub fn begin<B: BusSession + ?Sized>(&mut self, bus: &mut B) -> AuthResult<()> {
        let ecu = self.ecu();
        if self.state != SessionState::Idle {
            debug!("{ecu} restarting authentication from {:?}", self.state);
        }
        let frame = self.table.start.build(self.options.tx_id)?;
        let previous = self.state;
        self.state = SessionState::Awaiting(0);
        debug!("{ecu} Out -> {:02X?}", frame.as_bytes());
        if let Err(e) = bus.write(&frame) {
            error!("Error writing {ecu} authentication start frame: {e}");
            if self.options.write_failure_policy == WriteFailurePolicy::Hold {
                self.state = previous;
            }
            return Err(AuthError::Transmit { ecu, source: e });
        }
        Ok(())
    }

    /// Feeds a frame received from the ECU into the handshake
    ///
    /// ## Parameters
    /// * bus - Where replies are written
    /// * frame_type - Frame type from the PCI byte of the inbound frame
    /// * payload - Inbound bytes after the PCI byte
    ///
    /// ## Returns
    /// [StepOutcome::Ignored] if the frame does not fire the current step. If the step fired
    /// but its reply could not be written, [AuthError::Transmit] is returned and the state is updated
    /// according to the [WriteFailurePolicy]. A frame which fires a seed step without carrying a full
    /// seed results in [AuthError::MalformedFrame], and leaves the state untouched.
    pub fn on_frame<B: BusSession + ?Sized>(
        &mut self,
        bus: &mut B,
        frame_type: FrameType,
        payload: &[u8],
    ) -> AuthResult<StepOutcome> {
        let ecu = self.ecu();
        let SessionState::Awaiting(idx) = self.state else {
            debug!("{ecu} not authenticating. Ignoring {frame_type} {payload:02X?}");
            return Ok(StepOutcome::Ignored);
        };
        let Some(step) = self.table.steps.get(idx) else {
            return Ok(StepOutcome::Ignored);
        };
        if !step.trigger.matches(frame_type, payload) {
            debug!(
                "{ecu} waiting for '{}'. Ignoring {frame_type} {payload:02X?}",
                step.name
            );
            return Ok(StepOutcome::Ignored);
        }

        let next = if idx + 1 < self.table.steps.len() {
            SessionState::Awaiting(idx + 1)
        } else {
            SessionState::Complete
        };
        let tx_id = self.options.tx_id;

        let res = match step.action {
            Action::Reply(reply) => {
                let frame = reply.build(tx_id)?;
                debug!("{ecu} '{}' Out -> {:02X?}", step.name, frame.as_bytes());
                bus.write(&frame).map(|_| StepOutcome::Sent(frame))
            }
            Action::ReplyWithKey {
                pci,
                sub,
                transform,
            } => {
                let Some(seed) = seed_from_payload(payload) else {
                    warn!(
                        "{ecu} '{}' frame too short for a seed: {payload:02X?}",
                        step.name
                    );
                    return Err(AuthError::MalformedFrame {
                        ecu,
                        step: step.name,
                        expected: SEED_PAYLOAD_LEN,
                        actual: payload.len(),
                    });
                };
                let key = transform.apply(seed);
                debug!("{ecu} seed 0x{seed:08X} -> key 0x{key:08X} ({transform})");
                let k = key.to_be_bytes();
                let frame = Frame::new(tx_id, pci, &[sub, k[0], k[1], k[2], k[3]])?;
                debug!("{ecu} '{}' Out -> {:02X?}", step.name, frame.as_bytes());
                bus.write(&frame).map(|_| StepOutcome::Sent(frame))
            }
            Action::KeepAlive => {
                info!("{ecu} key accepted, requesting tester present to 0x{tx_id:04X}");
                bus.send_keepalive(tx_id)
                    .map(|_| StepOutcome::KeepAliveSent(tx_id))
            }
            Action::Complete => Ok(StepOutcome::Completed),
        };

        match res {
            Ok(outcome) => {
                self.state = next;
                if next == SessionState::Complete {
                    info!("{ecu} authentication complete");
                }
                Ok(outcome)
            }
            Err(e) => {
                error!("Error writing {ecu} authentication frame: {e}");
                if self.options.write_failure_policy == WriteFailurePolicy::Advance {
                    self.state = next;
                }
                Err(AuthError::Transmit { ecu, source: e })
            }
        }
    }
}

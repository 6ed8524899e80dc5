#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate which unlocks the security protected functions of the gateway (GWM) and
//! body control (BCM) modules found on MG EVs, so that protected data can be polled and
//! protected commands issued afterwards.
//!
//! ## Handshake
//!
//! Both modules use a proprietary seed/key exchange carried over ISO-TP (ISO15765-2) style frames.
//! The ECU hands out a 32 bit seed, and the tester answers with a 32 bit key derived by a transform
//! specific to that ECU (see [transform]). The order of the exchange is fixed, and an ECU which receives
//! a wrong key or an out of order frame silently stays locked.
//!
//! * GWM - two seed/key rounds followed by a two stage session close
//! * BCM - a single seed/key round, after which a tester present keep-alive must be sent to the module
//!
//! ## Driving a handshake
//!
//! This crate does not talk to hardware itself. The caller supplies a [channel::BusSession]
//! (or any [channel::CanChannel] wrapped in a [channel::CanBusSession]) and feeds every frame received
//! from the ECUs into a [dispatch::Dispatcher], or directly into a [sequencer::Sequencer].
//!
//! Sequencers are fully synchronous. They never block, never time out and never retry; if the ECU stops
//! replying, the sequencer stays parked in its current state until [sequencer::Sequencer::begin] is called again.

pub mod channel;
pub mod dispatch;
pub mod frame;
pub mod sequencer;
pub mod simulation;
pub mod transform;

use channel::ChannelError;
use sequencer::EcuKind;

/// Security access result
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
/// Security access error
pub enum AuthError {
    /// The bus refused to transmit a handshake frame
    #[error("Error writing {ecu} authentication frame")]
    Transmit {
        /// ECU the frame was destined for
        ecu: EcuKind,
        /// Underlying channel error
        #[source]
        source: ChannelError,
    },
    /// An inbound frame matched a handshake step but was too short to carry its seed
    #[error("{ecu} frame for step '{step}' too short. Expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// ECU which sent the frame
        ecu: EcuKind,
        /// Name of the handshake step the frame matched
        step: &'static str,
        /// Minimum payload length required
        expected: usize,
        /// Payload length received
        actual: usize,
    },
    /// Attempted to build a frame with more payload than fits in a CAN frame
    #[error("Frame payload of {0} bytes does not fit in a single CAN frame")]
    PayloadTooLong(usize),
    /// PCI control value does not fit in a nibble
    #[error("PCI control value 0x{0:02X} does not fit in 4 bits")]
    InvalidControlNibble(u8),
    /// Inbound CAN frame carried no data at all
    #[error("Received CAN frame without a PCI byte")]
    EmptyFrame,
    /// No sequencer is registered for this CAN ID
    #[error("No security access sequencer registered for ID 0x{0:04X}")]
    UnknownTarget(u32),
}

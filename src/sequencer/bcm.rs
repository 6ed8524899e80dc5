//! Body control module (BCM) handshake
//!
//! A single seed round using [bcm_round](crate::transform::bcm_round). The BCM relocks itself unless
//! it keeps receiving tester present messages, so the last step hands it over to the keep-alive.

use super::{Action, EcuKind, Reply, Step, StepTable, Trigger};
use crate::{
    frame::{pci, FrameType},
    transform::SecurityTransform,
};

const FIRST: u8 = pci(FrameType::First, 0);
const FLOW_CONTROL: u8 = pci(FrameType::FlowControl, 0xE);
const CONSECUTIVE: u8 = pci(FrameType::Consecutive, 7);

/// BCM handshake script
pub static BCM_TABLE: StepTable = StepTable {
    ecu: EcuKind::Bcm,
    start: Reply {
        pci: FIRST,
        sub: 0x03,
        extra: &[],
    },
    steps: &[
        Step {
            name: "session open",
            trigger: Trigger::exact(FrameType::First, 0x03),
            action: Action::Reply(Reply {
                pci: FLOW_CONTROL,
                sub: 0x00,
                extra: &[],
            }),
        },
        Step {
            name: "authentication started",
            trigger: Trigger::any(FrameType::FlowControl),
            action: Action::Reply(Reply {
                pci: CONSECUTIVE,
                sub: 0x01,
                extra: &[],
            }),
        },
        Step {
            name: "seed",
            trigger: Trigger::exact(FrameType::Consecutive, 0x01),
            action: Action::ReplyWithKey {
                pci: CONSECUTIVE,
                sub: 0x02,
                transform: SecurityTransform::Bcm,
            },
        },
        Step {
            name: "key accepted",
            trigger: Trigger::exact(FrameType::Consecutive, 0x02),
            action: Action::KeepAlive,
        },
    ],
};

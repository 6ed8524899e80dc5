//! Gateway module (GWM) handshake
//!
//! Opens two diagnostic sessions (1 and 3), answers two seeds (see [gwm_round1](crate::transform::gwm_round1)
//! and [gwm_round2](crate::transform::gwm_round2)), and then closes both sessions again.

use super::{Action, EcuKind, Reply, Step, StepTable, Trigger};
use crate::{
    frame::{pci, FrameType},
    transform::SecurityTransform,
};

/// Bytes following the seed 1 request sub-command
pub const GWM_SEED1_REQUEST: [u8; 4] = [0x3e, 0xab, 0x00, 0x0d];
/// Bytes following the session 1 close sub-command
pub const GWM_CLOSE_SESSION1: [u8; 3] = [0xaa, 0xff, 0x00];
/// Bytes following the session 3 close sub-command
pub const GWM_CLOSE_SESSION3: [u8; 2] = [0xaa, 0xff];

const FIRST: u8 = pci(FrameType::First, 0);
const CONSECUTIVE: u8 = pci(FrameType::Consecutive, 7);
const FLOW_CONTROL: u8 = pci(FrameType::FlowControl, 1);

/// GWM handshake script
pub static GWM_TABLE: StepTable = StepTable {
    ecu: EcuKind::Gwm,
    start: Reply {
        pci: FIRST,
        sub: 0x01,
        extra: &[],
    },
    steps: &[
        Step {
            name: "session 1 open",
            trigger: Trigger::exact(FrameType::First, 0x01),
            action: Action::Reply(Reply {
                pci: FIRST,
                sub: 0x03,
                extra: &[],
            }),
        },
        Step {
            name: "session 3 open",
            trigger: Trigger::exact(FrameType::First, 0x03),
            action: Action::Reply(Reply {
                pci: CONSECUTIVE,
                sub: 0x41,
                extra: &GWM_SEED1_REQUEST,
            }),
        },
        Step {
            name: "seed 1",
            trigger: Trigger::exact(FrameType::Consecutive, 0x41),
            action: Action::ReplyWithKey {
                pci: CONSECUTIVE,
                sub: 0x42,
                transform: SecurityTransform::GwmRound1,
            },
        },
        Step {
            name: "key 1 accepted",
            trigger: Trigger::exact(FrameType::Consecutive, 0x42),
            action: Action::Reply(Reply {
                pci: CONSECUTIVE,
                sub: 0x01,
                extra: &[],
            }),
        },
        Step {
            name: "seed 2",
            trigger: Trigger::exact(FrameType::Consecutive, 0x01),
            action: Action::ReplyWithKey {
                pci: CONSECUTIVE,
                sub: 0x02,
                transform: SecurityTransform::GwmRound2,
            },
        },
        Step {
            name: "key 2 accepted",
            trigger: Trigger::exact(FrameType::Consecutive, 0x02),
            action: Action::Reply(Reply {
                pci: FLOW_CONTROL,
                sub: 0x01,
                extra: &GWM_CLOSE_SESSION1,
            }),
        },
        Step {
            name: "session 1 closed",
            trigger: Trigger::exact(FrameType::FlowControl, 0x01),
            action: Action::Reply(Reply {
                pci: FLOW_CONTROL,
                sub: 0x03,
                extra: &GWM_CLOSE_SESSION3,
            }),
        },
        Step {
            name: "session 3 closed",
            trigger: Trigger::exact(FrameType::FlowControl, 0x03),
            action: Action::Complete,
        },
    ],
};

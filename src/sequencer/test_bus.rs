use crate::{
    channel::{BusSession, ChannelError, ChannelResult},
    frame::Frame,
};

/// Bus which records every request from a sequencer
#[derive(Debug, Default)]
pub struct RecordingBus {
    pub frames: Vec<Frame>,
    pub keepalives: Vec<u32>,
    pub fail: bool,
}

impl RecordingBus {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.frames.iter().map(|f| f.as_bytes().to_vec()).collect()
    }
}

impl BusSession for RecordingBus {
    fn write(&mut self, frame: &Frame) -> ChannelResult<()> {
        if self.fail {
            return Err(ChannelError::BufferFull);
        }
        self.frames.push(*frame);
        Ok(())
    }

    fn send_keepalive(&mut self, target_id: u32) -> ChannelResult<()> {
        if self.fail {
            return Err(ChannelError::BufferFull);
        }
        self.keepalives.push(target_id);
        Ok(())
    }
}

//! Simulation channel for unit testing security access sequencers

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use crate::channel::{CanChannel, CanFrame, ChannelError, ChannelResult};

/// In-memory [CanChannel] which records every frame written to it.
///
/// Clones share the same frame log, so a test can keep one clone and hand the other to the code under test.
#[derive(Debug, Clone, Default)]
pub struct SimulationCanChannel {
    tx_log: Arc<RwLock<Vec<CanFrame>>>,
    fail_writes: Arc<AtomicBool>,
}

impl SimulationCanChannel {
    /// Creates an empty simulation channel
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write fails with [ChannelError::BufferFull], as a busy bus would
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Frames written so far
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.tx_log.read().map(|l| l.clone()).unwrap_or_default()
    }

    /// Clears the frame log
    pub fn clear(&self) {
        if let Ok(mut l) = self.tx_log.write() {
            l.clear();
        }
    }
}

impl CanChannel for SimulationCanChannel {
    fn write_packets(&mut self, packets: Vec<CanFrame>, _timeout_ms: u32) -> ChannelResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(ChannelError::BufferFull);
        }
        self.tx_log
            .write()
            .map_err(|e| ChannelError::Other(e.to_string()))?
            .extend(packets);
        Ok(())
    }
}

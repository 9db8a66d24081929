use std::cell::Cell;

use ux_comms::{ChannelId, Comms};

use super::Driver;

/// Logs and discards payloads
#[derive(Debug, Default)]
pub struct SinkDriver {
    frames: Cell<u64>,
    bytes: Cell<u64>,
}

impl SinkDriver {
    /// Payloads swallowed so far
    pub fn frames(&self) -> u64 {
        self.frames.get()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.get()
    }
}

impl Driver for SinkDriver {
    fn name(&self) -> &'static str {
        "sink"
    }

    fn on_data(&self, _comms: &mut Comms, channel: ChannelId, payload: &[u8]) {
        self.frames.set(self.frames.get() + 1);
        self.bytes.set(self.bytes.get() + payload.len() as u64);
        tracing::debug!(
            channel = %channel,
            len = payload.len(),
            total_frames = self.frames.get(),
            "discarded"
        );
    }
}

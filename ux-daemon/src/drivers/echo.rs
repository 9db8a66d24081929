use ux_comms::{ChannelId, Comms};

use super::{reply, Driver};

/// Sends every payload back on the channel it arrived on
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoDriver;

impl Driver for EchoDriver {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn on_data(&self, comms: &mut Comms, channel: ChannelId, payload: &[u8]) {
        tracing::debug!(channel = %channel, len = payload.len(), "echo");
        reply(comms, channel, payload);
    }
}

//! Data-source drivers
//!
//! A driver answers the traffic on every connection accepted by the daemon's
//! server. Drivers are looked up by name in a static dispatch table.

mod command;
mod echo;
mod sink;

use std::rc::Rc;

use ux_comms::{ChannelId, Comms, ControlEvent, ControlKind};

use crate::error::{DaemonError, DaemonResult};

pub use command::CommandDriver;
pub use echo::EchoDriver;
pub use sink::SinkDriver;

/// Handler for the traffic of accepted connections
pub trait Driver {
    /// Name the driver is registered under
    fn name(&self) -> &'static str;

    /// Called once per received payload
    fn on_data(&self, comms: &mut Comms, channel: ChannelId, payload: &[u8]);

    /// Called on every link state change
    fn on_control(&self, _comms: &mut Comms, event: &ControlEvent) {
        match event.kind() {
            ControlKind::NewService | ControlKind::Connect => tracing::info!(
                driver = self.name(),
                channel = %event.channel(),
                peer = %event.address(),
                port = event.port(),
                "session opened"
            ),
            ControlKind::LinkDown | ControlKind::LinkFail => tracing::info!(
                driver = self.name(),
                channel = %event.channel(),
                peer = %event.address(),
                "session ended"
            ),
        }
    }
}

type DriverFactory = fn() -> Rc<dyn Driver>;

const DRIVERS: &[(&str, DriverFactory)] = &[
    ("echo", echo_driver),
    ("command", command_driver),
    ("sink", sink_driver),
];

fn echo_driver() -> Rc<dyn Driver> {
    Rc::new(EchoDriver)
}

fn command_driver() -> Rc<dyn Driver> {
    Rc::new(CommandDriver::default())
}

fn sink_driver() -> Rc<dyn Driver> {
    Rc::new(SinkDriver::default())
}

/// Names of the built-in drivers
pub fn names() -> Vec<&'static str> {
    DRIVERS.iter().map(|(name, _)| *name).collect()
}

/// Create the driver registered under `name`
pub fn lookup(name: &str) -> DaemonResult<Rc<dyn Driver>> {
    DRIVERS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, factory)| factory())
        .ok_or_else(|| DaemonError::UnknownDriver {
            name: name.to_string(),
            available: names().join(", "),
        })
}

/// Listen on `port` and route every accepted connection to `driver`
pub fn attach_server(
    comms: &mut Comms,
    driver: Rc<dyn Driver>,
    port: u16,
    fork_on_accept: bool,
) -> DaemonResult<ChannelId> {
    let data_driver = driver.clone();
    let channel = comms.add_server(
        port,
        fork_on_accept,
        move |comms, channel, payload| data_driver.on_data(comms, channel, payload),
        move |comms, event| driver.on_control(comms, event),
    )?;
    Ok(channel)
}

/// Send a reply, waiting for a previous one to drain
pub(crate) fn reply(comms: &mut Comms, channel: ChannelId, payload: &[u8]) {
    if let Err(err) = comms.block_send(channel, payload) {
        tracing::warn!(channel = %channel, error = %err, "reply not sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_builtin_drivers() {
        for name in names() {
            assert_eq!(lookup(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_lookup_unknown() {
        match lookup("nope") {
            Err(DaemonError::UnknownDriver { name, available }) => {
                assert_eq!(name, "nope");
                assert_eq!(available, "echo, command, sink");
            }
            _ => panic!("expected UnknownDriver"),
        }
    }
}

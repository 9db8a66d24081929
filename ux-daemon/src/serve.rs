//! Long-running dispatcher: one server, one driver

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ux_comms::{ChannelId, Comms};

use crate::config::DaemonConfig;
use crate::drivers;
use crate::error::DaemonResult;

/// A transport with the configured driver attached to its server
pub struct Daemon {
    comms: Comms,
    server: ChannelId,
    driver: &'static str,
}

impl Daemon {
    /// Validate `config`, create the transport and start listening
    pub fn start(config: &DaemonConfig) -> DaemonResult<Self> {
        config.validate()?;
        let driver = drivers::lookup(&config.driver)?;
        let driver_name = driver.name();

        let mut comms = Comms::new(config.comms.clone())?;
        let server = drivers::attach_server(&mut comms, driver, config.port, config.fork_on_accept)?;
        if config.raw_mode {
            comms.set_raw_mode(server, true)?;
        }

        tracing::info!(
            port = comms.local_port(server).unwrap_or(config.port),
            driver = driver_name,
            fork_on_accept = config.fork_on_accept,
            raw_mode = config.raw_mode,
            "uxd v{} serving",
            env!("CARGO_PKG_VERSION")
        );
        Ok(Self {
            comms,
            server,
            driver: driver_name,
        })
    }

    /// Port actually bound (differs from the configured one when that was 0)
    pub fn local_port(&self) -> u16 {
        self.comms.local_port(self.server).unwrap_or(0)
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver
    }

    /// Flag that stops [`Daemon::run`] after the current tick
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.comms.shutdown_handle()
    }

    /// Serve until the shutdown flag is set
    pub fn run(&mut self) -> DaemonResult<()> {
        self.comms.run_forever()?;
        tracing::info!(driver = self.driver, "uxd stopped");
        Ok(())
    }
}

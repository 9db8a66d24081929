//! Daemon configuration
//!
//! Layered in increasing precedence: defaults, JSON file, environment
//! (`UXD_PORT`, `UXD_DRIVER`), command-line flags. Each layer above the base
//! is a [`DaemonConfigBuilder`] holding only the values it sets.

use std::path::Path;

use serde::{Deserialize, Serialize};
use ux_comms::CommsConfig;

use crate::drivers;
use crate::error::{DaemonError, DaemonResult};

/// Environment variable overriding the listen port
pub const ENV_PORT: &str = "UXD_PORT";
/// Environment variable overriding the driver name
pub const ENV_DRIVER: &str = "UXD_DRIVER";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Port to listen on
    pub port: u16,
    /// Driver serving every accepted connection
    pub driver: String,
    /// Serve each connection in its own process
    pub fork_on_accept: bool,
    /// Exchange unframed bytes
    pub raw_mode: bool,
    /// Transport tunables
    pub comms: CommsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 7000,
            driver: "echo".to_string(),
            fork_on_accept: false,
            raw_mode: false,
            comms: CommsConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Create a new configuration builder
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> DaemonResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> DaemonResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            DaemonError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_json_str(&content)
    }

    /// Check the transport settings and that the driver exists
    pub fn validate(&self) -> DaemonResult<()> {
        self.comms.validate()?;
        drivers::lookup(&self.driver)?;
        Ok(())
    }
}

/// Builder for DaemonConfig; unset fields keep the base value
#[derive(Debug, Default, Clone)]
pub struct DaemonConfigBuilder {
    port: Option<u16>,
    driver: Option<String>,
    fork_on_accept: Option<bool>,
    raw_mode: Option<bool>,
    comms: Option<CommsConfig>,
}

impl DaemonConfigBuilder {
    /// Overrides from the process environment
    pub fn from_env() -> DaemonResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overrides from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DaemonResult<Self> {
        let mut builder = Self::default();
        if let Some(port) = lookup(ENV_PORT) {
            let port = port.trim().parse().map_err(|_| {
                DaemonError::Config(format!("{} is not a port number: '{}'", ENV_PORT, port))
            })?;
            builder = builder.port(port);
        }
        if let Some(driver) = lookup(ENV_DRIVER) {
            builder = builder.driver(driver.trim());
        }
        Ok(builder)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn driver(mut self, driver: &str) -> Self {
        self.driver = Some(driver.to_string());
        self
    }

    pub fn fork_on_accept(mut self, fork: bool) -> Self {
        self.fork_on_accept = Some(fork);
        self
    }

    pub fn raw_mode(mut self, raw: bool) -> Self {
        self.raw_mode = Some(raw);
        self
    }

    pub fn comms(mut self, comms: CommsConfig) -> Self {
        self.comms = Some(comms);
        self
    }

    /// Apply the set fields on top of `base`
    pub fn build_on(self, base: DaemonConfig) -> DaemonConfig {
        DaemonConfig {
            port: self.port.unwrap_or(base.port),
            driver: self.driver.unwrap_or(base.driver),
            fork_on_accept: self.fork_on_accept.unwrap_or(base.fork_on_accept),
            raw_mode: self.raw_mode.unwrap_or(base.raw_mode),
            comms: self.comms.unwrap_or(base.comms),
        }
    }

    /// Build the configuration on top of the defaults
    pub fn build(self) -> DaemonConfig {
        self.build_on(DaemonConfig::default())
    }
}

//! # UX Daemon
//!
//! Wires data-source drivers to the `ux-comms` transport: one listening
//! server whose accepted connections are all served by a named driver, and
//! a one-shot `ping` client for poking at a running daemon.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ux_daemon::{Daemon, DaemonConfig};
//!
//! let config = DaemonConfig::builder().port(7000).driver("command").build();
//! let mut daemon = Daemon::start(&config).unwrap();
//! daemon.run().unwrap();
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod ping;
pub mod serve;

pub use config::{DaemonConfig, DaemonConfigBuilder};
pub use drivers::Driver;
pub use error::{DaemonError, DaemonResult};
pub use ping::{ping, PingOptions};
pub use serve::Daemon;

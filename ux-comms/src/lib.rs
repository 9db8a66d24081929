//! # UX Comms - callback-driven socket transport
//!
//! A single-threaded reactor that multiplexes TCP servers, the connections
//! they accept, and auto-reconnecting clients, plus a list of software timers.
//!
//! - **Framing**: every message travels as
//!   `SYNC SYNC STX LEN_HI LEN_LO payload ETX CRC_HI CRC_LO`, checked with a
//!   CRC-16 over payload and terminator; raw mode passes bytes through as read
//! - **Lifecycle**: clients reconnect with short/long backoff, servers can
//!   fork a process per accepted connection
//! - **Callbacks**: one data callback per frame, one control callback per link
//!   state change, both receiving `&mut Comms`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use ux_comms::{Comms, CommsConfig, ControlKind, TimerMode};
//!
//! let mut comms = Comms::new(CommsConfig::default()).unwrap();
//!
//! let client = comms
//!     .add_client(
//!         7000,
//!         "localhost",
//!         "telemetry",
//!         |_comms, channel, payload| println!("{}: {} bytes", channel, payload.len()),
//!         |comms, event| {
//!             if event.kind() == ControlKind::Connect {
//!                 let _ = comms.send(event.channel(), b"HELLO");
//!             }
//!         },
//!     )
//!     .unwrap();
//!
//! comms.register_timer(
//!     1000,
//!     TimerMode::Astable,
//!     client.get() as u64,
//!     Rc::new(|comms: &mut Comms, _: u64| {
//!         for channel in comms.channels() {
//!             let _ = comms.send(channel, b"TICK");
//!         }
//!     }),
//! );
//!
//! comms.run_forever().unwrap();
//! ```

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod reactor;
pub mod registry;
pub mod timer;

// Re-export main types
pub use buffer::{ReceiveBuffer, TransmitBuffer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{FRAME_OVERHEAD, MAX_FRAME_PAYLOAD};
pub use config::{CommsConfig, CommsConfigBuilder};
pub use error::{CommsError, ErrorCategory, Result};
pub use event::{ControlCallback, ControlEvent, ControlKind, DataCallback};
pub use lifecycle::{classify_connect_error, ConnectOutcome};
pub use reactor::Comms;
pub use registry::{ChannelId, LinkStatus, Role};
pub use timer::{TimerCallback, TimerId, TimerInfo, TimerMode, TimerStatus};

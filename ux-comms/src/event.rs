//! Callback interface between the transport and its owner
//!
//! Each connection carries one data callback and one control callback. Both
//! receive `&mut Comms`, so they may send, close, register timers or request
//! close-down from inside the reactor tick.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::reactor::Comms;
use crate::registry::ChannelId;

/// Called once per extracted frame (or once per raw read)
pub type DataCallback = Rc<dyn Fn(&mut Comms, ChannelId, &[u8])>;

/// Called on every link state change
pub type ControlCallback = Rc<dyn Fn(&mut Comms, &ControlEvent)>;

/// Kind of link state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// A server accepted a new connection
    NewService,
    /// A client link came up
    Connect,
    /// A client link was lost and will be retried
    LinkDown,
    /// The connection was torn down or failed for good
    LinkFail,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlKind::NewService => "new_service",
            ControlKind::Connect => "connect",
            ControlKind::LinkDown => "link_down",
            ControlKind::LinkFail => "link_fail",
        };
        f.write_str(name)
    }
}

/// Link state change delivered to a control callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    NewService {
        channel: ChannelId,
        port: u16,
        address: String,
    },
    Connect {
        channel: ChannelId,
        port: u16,
        address: String,
    },
    LinkDown {
        channel: ChannelId,
        port: u16,
        address: String,
    },
    LinkFail {
        channel: ChannelId,
        port: u16,
        address: String,
    },
}

impl ControlEvent {
    pub(crate) fn new(kind: ControlKind, channel: ChannelId, port: u16, address: String) -> Self {
        match kind {
            ControlKind::NewService => ControlEvent::NewService { channel, port, address },
            ControlKind::Connect => ControlEvent::Connect { channel, port, address },
            ControlKind::LinkDown => ControlEvent::LinkDown { channel, port, address },
            ControlKind::LinkFail => ControlEvent::LinkFail { channel, port, address },
        }
    }

    pub fn kind(&self) -> ControlKind {
        match self {
            ControlEvent::NewService { .. } => ControlKind::NewService,
            ControlEvent::Connect { .. } => ControlKind::Connect,
            ControlEvent::LinkDown { .. } => ControlKind::LinkDown,
            ControlEvent::LinkFail { .. } => ControlKind::LinkFail,
        }
    }

    pub fn channel(&self) -> ChannelId {
        match self {
            ControlEvent::NewService { channel, .. }
            | ControlEvent::Connect { channel, .. }
            | ControlEvent::LinkDown { channel, .. }
            | ControlEvent::LinkFail { channel, .. } => *channel,
        }
    }

    /// Peer port
    pub fn port(&self) -> u16 {
        match self {
            ControlEvent::NewService { port, .. }
            | ControlEvent::Connect { port, .. }
            | ControlEvent::LinkDown { port, .. }
            | ControlEvent::LinkFail { port, .. } => *port,
        }
    }

    /// Peer address or host name
    pub fn address(&self) -> &str {
        match self {
            ControlEvent::NewService { address, .. }
            | ControlEvent::Connect { address, .. }
            | ControlEvent::LinkDown { address, .. }
            | ControlEvent::LinkFail { address, .. } => address,
        }
    }
}

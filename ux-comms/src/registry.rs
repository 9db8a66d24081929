//! Connection registry
//!
//! Every listening server, accepted service connection and outbound client is
//! a [`Connection`] keyed by a [`ChannelId`]. Ids come from a high-water mark
//! and are never handed out twice in the same process.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use serde::{Deserialize, Serialize};

use crate::buffer::{Drain, ReceiveBuffer, TransmitBuffer};
use crate::config::CommsConfig;
use crate::event::{ControlCallback, DataCallback};

/// Channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the link this record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Listener, or a connection accepted by one
    Server,
    /// Outbound connection that reconnects on loss
    Client,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Server socket waiting for connections
    Listening,
    /// Traffic flows in both directions
    Up,
    /// Client waiting to (re)connect
    Down,
    /// Socket released after an unrecoverable fault
    Failed,
}

/// The OS resource behind a connection
#[derive(Debug)]
pub(crate) enum Endpoint {
    /// No socket (client between attempts, or failed)
    Idle,
    /// Non-blocking connect in flight
    Connecting {
        socket: socket2::Socket,
        target: SocketAddr,
    },
    Listener(TcpListener),
    Stream(TcpStream),
}

/// One registered connection
pub struct Connection {
    pub(crate) channel: ChannelId,
    pub(crate) role: Role,
    pub(crate) status: LinkStatus,
    pub(crate) endpoint: Endpoint,
    /// Host name or address the client dials, or the accepted peer's address
    pub(crate) address: String,
    pub(crate) name: String,
    pub(crate) peer_port: u16,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) local_port: u16,
    pub(crate) raw_mode: bool,
    pub(crate) rx: ReceiveBuffer,
    pub(crate) tx: Option<TransmitBuffer>,
    /// Earliest time a `Down` client may try to connect
    pub(crate) down_until: u64,
    pub(crate) close_requested: bool,
    pub(crate) fork_on_accept: bool,
    /// Socket fault noticed outside the receive path, handled at tick end
    pub(crate) fault: Option<io::ErrorKind>,
    pub(crate) on_data: DataCallback,
    pub(crate) on_control: ControlCallback,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("channel", &self.channel)
            .field("role", &self.role)
            .field("status", &self.status)
            .field("address", &self.address)
            .field("peer_port", &self.peer_port)
            .field("local_port", &self.local_port)
            .field("raw_mode", &self.raw_mode)
            .field("buffered", &self.rx.len())
            .field("sending", &self.tx.is_some())
            .field("close_requested", &self.close_requested)
            .finish()
    }
}

impl Connection {
    /// A listening server record
    pub(crate) fn server(
        channel: ChannelId,
        listener: TcpListener,
        local_port: u16,
        fork_on_accept: bool,
        config: &CommsConfig,
        on_data: DataCallback,
        on_control: ControlCallback,
    ) -> Self {
        Self {
            channel,
            role: Role::Server,
            status: LinkStatus::Listening,
            endpoint: Endpoint::Listener(listener),
            address: String::new(),
            name: String::new(),
            peer_port: 0,
            peer_addr: None,
            local_port,
            raw_mode: false,
            rx: ReceiveBuffer::from_config(config),
            tx: None,
            down_until: 0,
            close_requested: false,
            fork_on_accept,
            fault: None,
            on_data,
            on_control,
        }
    }

    /// An outbound client record, eligible to connect immediately
    pub(crate) fn client(
        channel: ChannelId,
        port: u16,
        address: &str,
        name: &str,
        config: &CommsConfig,
        on_data: DataCallback,
        on_control: ControlCallback,
    ) -> Self {
        Self {
            channel,
            role: Role::Client,
            status: LinkStatus::Down,
            endpoint: Endpoint::Idle,
            address: address.to_string(),
            name: name.to_string(),
            peer_port: port,
            peer_addr: None,
            local_port: 0,
            raw_mode: false,
            rx: ReceiveBuffer::from_config(config),
            tx: None,
            down_until: 0,
            close_requested: false,
            fork_on_accept: false,
            fault: None,
            on_data,
            on_control,
        }
    }

    /// A service connection accepted by `server`, sharing its callbacks
    pub(crate) fn accepted(
        channel: ChannelId,
        server: &Connection,
        stream: TcpStream,
        peer: SocketAddr,
        config: &CommsConfig,
    ) -> Self {
        Self {
            channel,
            role: Role::Server,
            status: LinkStatus::Up,
            endpoint: Endpoint::Stream(stream),
            address: peer.ip().to_string(),
            name: server.name.clone(),
            peer_port: peer.port(),
            peer_addr: Some(peer),
            local_port: server.local_port,
            raw_mode: server.raw_mode,
            rx: ReceiveBuffer::from_config(config),
            tx: None,
            down_until: 0,
            close_requested: false,
            fork_on_accept: false,
            fault: None,
            on_data: server.on_data.clone(),
            on_control: server.on_control.clone(),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_sending(&self) -> bool {
        self.tx.is_some()
    }

    /// Write pending transmit bytes to the stream; the buffer is released
    /// exactly once, when the last byte is written
    pub(crate) fn flush_transmit(&mut self) -> io::Result<Drain> {
        let Some(tx) = self.tx.as_mut() else {
            return Ok(Drain::Complete);
        };
        let Endpoint::Stream(stream) = &mut self.endpoint else {
            return Ok(Drain::Pending {
                remaining: tx.remaining().len(),
            });
        };
        let drain = tx.drain_to(stream)?;
        if drain == Drain::Complete {
            self.tx = None;
        }
        Ok(drain)
    }

    /// Deferred close may proceed once nothing is left to send
    pub(crate) fn ready_to_close(&self) -> bool {
        self.close_requested && self.tx.is_none()
    }

    /// Drop the socket and both buffers' contents
    pub(crate) fn release(&mut self) {
        self.endpoint = Endpoint::Idle;
        self.tx = None;
        self.rx.clear();
    }
}

/// All live connections, ordered by channel id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ChannelId, Connection>,
    high_water: u32,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next channel id
    pub fn next_channel(&mut self) -> ChannelId {
        self.high_water += 1;
        ChannelId(self.high_water)
    }

    pub fn insert(&mut self, connection: Connection) {
        debug_assert!(!self.connections.contains_key(&connection.channel));
        self.high_water = self.high_water.max(connection.channel.0);
        self.connections.insert(connection.channel, connection);
    }

    pub fn remove(&mut self, channel: ChannelId) -> Option<Connection> {
        self.connections.remove(&channel)
    }

    pub fn get(&self, channel: ChannelId) -> Option<&Connection> {
        self.connections.get(&channel)
    }

    pub fn get_mut(&mut self, channel: ChannelId) -> Option<&mut Connection> {
        self.connections.get_mut(&channel)
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.connections.contains_key(&channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Snapshot of ids, safe to walk while callbacks mutate the registry
    pub fn channels(&self) -> Vec<ChannelId> {
        self.connections.keys().copied().collect()
    }

    /// Ids matching a predicate
    pub fn channels_where(&self, mut pred: impl FnMut(&Connection) -> bool) -> Vec<ChannelId> {
        self.connections
            .values()
            .filter(|c| pred(c))
            .map(|c| c.channel)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every record except `keep`, without touching the OS resources'
    /// registrations (used in a forked child)
    pub(crate) fn retain_only(&mut self, keep: Option<ChannelId>) -> Vec<Connection> {
        let all = std::mem::take(&mut self.connections);
        let mut dropped = Vec::new();
        for (id, conn) in all {
            if Some(id) == keep {
                self.connections.insert(id, conn);
            } else {
                dropped.push(conn);
            }
        }
        dropped
    }
}

//! Reactor
//!
//! [`Comms`] is the transport context: it owns the connection registry, the
//! timer list and the readiness poller, and everything happens inside
//! [`Comms::poll`] on the caller's thread.
//!
//! ## One tick
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────┐   ┌─────────────┐
//! │ fire timers  │──▶│ due connects,    │──▶│ wait for       │──▶│ accept,     │
//! │ (next wait)  │   │ pending flushes  │   │ readiness      │   │ receive,    │
//! └──────────────┘   └──────────────────┘   │ (bounded)      │   │ flush       │
//!                                            └────────────────┘   └──────┬──────┘
//!                                                                        ▼
//!                                           ┌──────────────────────────────────┐
//!                                           │ faults, deferred closes, reaping │
//!                                           └──────────────────────────────────┘
//! ```
//!
//! Only the readiness wait blocks. Callbacks run synchronously inside the
//! tick and receive `&mut Comms`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ux_comms::{Comms, CommsConfig, ControlEvent};
//!
//! let mut comms = Comms::new(CommsConfig::default()).unwrap();
//! comms
//!     .add_server(
//!         7000,
//!         false,
//!         |comms, channel, payload| {
//!             let _ = comms.send(channel, payload);
//!         },
//!         |_comms, event: &ControlEvent| println!("{:?}", event),
//!     )
//!     .unwrap();
//! comms.run_forever().unwrap();
//! ```

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};

use crate::buffer::{Drain, TransmitBuffer};
use crate::clock::{Clock, SystemClock};
use crate::config::CommsConfig;
use crate::error::{CommsError, Result};
use crate::event::{ControlCallback, ControlEvent, DataCallback};
use crate::lifecycle;
use crate::registry::{ChannelId, Connection, ConnectionRegistry, Endpoint, LinkStatus, Role};
use crate::timer::{self, TimerCallback, TimerHost, TimerId, TimerInfo, TimerList, TimerMode};

/// Interest every established stream is registered with
pub(crate) const STREAM_INTEREST: Interest = Interest::READABLE.add(Interest::WRITABLE);

pub(crate) fn token(channel: ChannelId) -> Token {
    Token(channel.get() as usize)
}

/// Readiness reported for one channel
#[derive(Debug, Clone, Copy)]
struct Readiness {
    channel: ChannelId,
    readable: bool,
    writable: bool,
    error: bool,
}

/// Transport context
pub struct Comms {
    pub(crate) config: CommsConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) timers: TimerList<Comms>,
    pub(crate) poll: Poll,
    events: Events,
    clock: Rc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
    /// Processes forked to serve accepted connections, not yet reaped
    pub(crate) children: Vec<i32>,
    /// Set in a forked child: the one connection it serves
    pub(crate) service_channel: Option<ChannelId>,
}

impl std::fmt::Debug for Comms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comms")
            .field("connections", &self.registry.len())
            .field("timers", &self.timers)
            .field("clock", &self.clock.name())
            .field("closing_down", &self.is_closing_down())
            .field("children", &self.children.len())
            .field("service_channel", &self.service_channel)
            .finish()
    }
}

impl Comms {
    /// Create a transport using the system clock
    pub fn new(config: CommsConfig) -> Result<Self> {
        Self::with_clock(config, Rc::new(SystemClock::new()))
    }

    /// Create a transport reading time from `clock`
    pub fn with_clock(config: CommsConfig, clock: Rc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let events = Events::with_capacity(config.events_capacity);
        Ok(Self {
            config,
            registry: ConnectionRegistry::new(),
            timers: TimerList::new(),
            poll: Poll::new()?,
            events,
            clock,
            shutdown: Arc::new(AtomicBool::new(false)),
            children: Vec::new(),
            service_channel: None,
        })
    }

    pub fn config(&self) -> &CommsConfig {
        &self.config
    }

    /// Current time on the transport's clock
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Registration
    // ───────────────────────────────────────────────────────────────────────

    /// Listen on `port` (0 picks an ephemeral port; see [`Comms::local_port`])
    ///
    /// Connections accepted by this server share its callbacks. With
    /// `fork_on_accept`, each accepted connection is served by a child process.
    pub fn add_server<D, C>(
        &mut self,
        port: u16,
        fork_on_accept: bool,
        on_data: D,
        on_control: C,
    ) -> Result<ChannelId>
    where
        D: Fn(&mut Comms, ChannelId, &[u8]) + 'static,
        C: Fn(&mut Comms, &ControlEvent) + 'static,
    {
        let mut listener = lifecycle::bind_listener(port)?;
        let local_port = listener.local_addr()?.port();
        let channel = self.registry.next_channel();
        self.poll
            .registry()
            .register(&mut listener, token(channel), Interest::READABLE)?;

        let on_data: DataCallback = Rc::new(on_data);
        let on_control: ControlCallback = Rc::new(on_control);
        self.registry.insert(Connection::server(
            channel,
            listener,
            local_port,
            fork_on_accept,
            &self.config,
            on_data,
            on_control,
        ));
        tracing::info!(channel = %channel, port = local_port, fork_on_accept, "listening");
        Ok(channel)
    }

    /// Register a client for `address:port`; it connects on the next tick
    /// and keeps reconnecting whenever the link is lost
    pub fn add_client<D, C>(
        &mut self,
        port: u16,
        address: &str,
        name: &str,
        on_data: D,
        on_control: C,
    ) -> Result<ChannelId>
    where
        D: Fn(&mut Comms, ChannelId, &[u8]) + 'static,
        C: Fn(&mut Comms, &ControlEvent) + 'static,
    {
        if address.is_empty() {
            return Err(CommsError::AddressResolution {
                address: address.to_string(),
                reason: "empty address".to_string(),
            });
        }
        let channel = self.registry.next_channel();
        let on_data: DataCallback = Rc::new(on_data);
        let on_control: ControlCallback = Rc::new(on_control);
        self.registry.insert(Connection::client(
            channel,
            port,
            address,
            name,
            &self.config,
            on_data,
            on_control,
        ));
        tracing::info!(channel = %channel, address, port, name, "client registered");
        Ok(channel)
    }

    /// Add a timer, or reconfigure the one with the same callback and user data
    ///
    /// A timer is identified by the callback's `Rc` allocation plus
    /// `user_data`, not by the function it wraps. To reconfigure a timer, pass
    /// a clone of the same `Rc`; wrapping the same function in a fresh
    /// `Rc::new` registers a second timer. The returned [`TimerId`] reads the
    /// entry back through [`Comms::timer_info`].
    pub fn register_timer(
        &mut self,
        period_ms: u64,
        mode: TimerMode,
        user_data: u64,
        callback: TimerCallback<Comms>,
    ) -> TimerId {
        let now = self.now_ms();
        self.timers
            .register(period_ms, mode, user_data, callback, now)
    }

    pub fn timer_info(&self, id: TimerId) -> Option<TimerInfo> {
        self.timers.info(id)
    }

    /// Deliver the raw byte stream instead of frames (and send unframed)
    pub fn set_raw_mode(&mut self, channel: ChannelId, raw: bool) -> Result<()> {
        let conn = self
            .registry
            .get_mut(channel)
            .ok_or(CommsError::InvalidChannel { channel })?;
        conn.raw_mode = raw;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Data path
    // ───────────────────────────────────────────────────────────────────────

    /// Queue one payload and start writing it
    ///
    /// Non-blocking. An empty payload flushes the pending frame instead and
    /// returns `Ok` once it has fully drained.
    ///
    /// # Errors
    ///
    /// - `InvalidChannel`: unknown channel, or a listening server
    /// - `Busy`: a previous frame is still draining
    /// - `NoService`: the client link is down
    /// - `BadSocket`: the connection failed, or the write failed
    /// - `PayloadTooLarge`: the payload does not fit a frame
    pub fn send(&mut self, channel: ChannelId, payload: &[u8]) -> Result<()> {
        let max_payload = self.config.max_payload();
        let conn = self
            .registry
            .get_mut(channel)
            .ok_or(CommsError::InvalidChannel { channel })?;

        match conn.status {
            LinkStatus::Up => {}
            LinkStatus::Listening => return Err(CommsError::InvalidChannel { channel }),
            LinkStatus::Down => return Err(CommsError::NoService { channel }),
            LinkStatus::Failed => {
                return Err(CommsError::BadSocket {
                    channel,
                    reason: "connection failed".to_string(),
                })
            }
        }
        if let Some(kind) = conn.fault {
            return Err(CommsError::BadSocket {
                channel,
                reason: io::Error::from(kind).to_string(),
            });
        }

        if payload.is_empty() {
            return self.flush_channel(channel);
        }
        if conn.tx.is_some() {
            return Err(CommsError::Busy { channel });
        }
        if !conn.raw_mode && payload.len() > max_payload {
            return Err(CommsError::PayloadTooLarge {
                size: payload.len(),
                max: max_payload,
            });
        }

        conn.tx = Some(TransmitBuffer::for_payload(payload, conn.raw_mode)?);
        tracing::trace!(channel = %channel, len = payload.len(), "frame queued");
        match self.flush_channel(channel) {
            Ok(()) | Err(CommsError::Busy { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Retry [`Comms::send`] until the payload is queued or a hard error occurs
    ///
    /// Flushes between attempts, pausing `block_send_sleep_ms` while the
    /// socket will not take more data.
    pub fn block_send(&mut self, channel: ChannelId, payload: &[u8]) -> Result<()> {
        loop {
            match self.send(channel, payload) {
                Err(CommsError::Busy { .. }) => match self.send(channel, &[]) {
                    Ok(()) => continue,
                    Err(CommsError::Busy { .. }) => self.pause_for_retry(),
                    Err(err) => return Err(err),
                },
                other => return other,
            }
        }
    }

    fn pause_for_retry(&self) {
        match self.config.block_send_sleep_ms {
            0 => std::thread::yield_now(),
            ms => std::thread::sleep(Duration::from_millis(ms)),
        }
    }

    /// Ask for the connection to be closed once its pending output drains
    pub fn close(&mut self, channel: ChannelId) -> Result<()> {
        let conn = self
            .registry
            .get_mut(channel)
            .ok_or(CommsError::InvalidChannel { channel })?;
        conn.close_requested = true;
        tracing::debug!(channel = %channel, draining = conn.tx.is_some(), "close requested");
        Ok(())
    }

    fn flush_channel(&mut self, channel: ChannelId) -> Result<()> {
        let Some(conn) = self.registry.get_mut(channel) else {
            return Err(CommsError::InvalidChannel { channel });
        };
        match conn.flush_transmit() {
            Ok(Drain::Complete) => Ok(()),
            Ok(Drain::Pending { remaining }) => {
                tracing::trace!(channel = %channel, remaining, "transmit pending");
                Err(CommsError::Busy { channel })
            }
            Err(err) => {
                tracing::warn!(channel = %channel, error = %err, "write failed");
                conn.fault = Some(err.kind());
                Err(CommsError::BadSocket {
                    channel,
                    reason: err.to_string(),
                })
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Introspection
    // ───────────────────────────────────────────────────────────────────────

    pub fn status(&self, channel: ChannelId) -> Option<LinkStatus> {
        self.registry.get(channel).map(Connection::status)
    }

    pub fn role(&self, channel: ChannelId) -> Option<Role> {
        self.registry.get(channel).map(Connection::role)
    }

    /// Port a server listens on, or the local port of an established link
    pub fn local_port(&self, channel: ChannelId) -> Option<u16> {
        self.registry.get(channel).map(|c| c.local_port)
    }

    pub fn peer_addr(&self, channel: ChannelId) -> Option<SocketAddr> {
        self.registry.get(channel).and_then(|c| c.peer_addr)
    }

    /// True while a frame is still draining on the channel
    pub fn is_sending(&self, channel: ChannelId) -> bool {
        self.registry
            .get(channel)
            .is_some_and(Connection::is_sending)
    }

    /// Earliest time a `Down` client will try to connect again
    pub fn next_connect_attempt(&self, channel: ChannelId) -> Option<u64> {
        self.registry
            .get(channel)
            .filter(|c| c.status == LinkStatus::Down)
            .map(|c| c.down_until)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.registry.channels()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Forked service processes that have not been reaped yet
    pub fn service_processes(&self) -> usize {
        self.children.len()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Close-down
    // ───────────────────────────────────────────────────────────────────────

    /// Make [`Comms::run_forever`] return after the current tick
    pub fn close_down(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_closing_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Flag another thread or a signal handler can set to stop the loop
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Event loop
    // ───────────────────────────────────────────────────────────────────────

    /// Run ticks until close-down is requested
    pub fn run_forever(&mut self) -> Result<()> {
        tracing::info!(connections = self.registry.len(), "reactor running");
        while !self.is_closing_down() {
            self.poll(self.config.max_hibernation_ms)?;
        }
        tracing::info!("reactor closed down");
        Ok(())
    }

    /// Run one tick, waiting at most `max_wait_ms` for socket activity
    pub fn poll(&mut self, max_wait_ms: u64) -> Result<()> {
        let timer_wait = timer::run_due(self, self.config.max_hibernation_ms);

        self.connect_due_clients();
        self.flush_pending();
        self.process_faults();

        let wait = self.connect_wait(timer_wait.min(max_wait_ms));
        for ready in self.wait_for_readiness(wait)? {
            self.dispatch(ready);
        }

        self.process_faults();
        self.process_deferred_closes();
        self.reap_children();
        Ok(())
    }

    /// Shorten `wait` so no due client retry is overslept
    fn connect_wait(&self, wait: u64) -> u64 {
        let now = self.now_ms();
        self.registry
            .iter()
            .filter(|c| c.role == Role::Client && c.status == LinkStatus::Down)
            .map(|c| c.down_until.saturating_sub(now))
            .fold(wait, u64::min)
    }

    fn wait_for_readiness(&mut self, wait_ms: u64) -> Result<Vec<Readiness>> {
        match self
            .poll
            .poll(&mut self.events, Some(Duration::from_millis(wait_ms)))
        {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        }

        Ok(self
            .events
            .iter()
            .map(|event| Readiness {
                channel: ChannelId::new(event.token().0 as u32),
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable(),
                error: event.is_error(),
            })
            .collect())
    }

    fn dispatch(&mut self, ready: Readiness) {
        let Some(status) = self.status(ready.channel) else {
            return;
        };
        match status {
            LinkStatus::Listening => self.accept_pending(ready.channel),
            LinkStatus::Up => {
                if ready.writable {
                    let _ = self.flush_channel(ready.channel);
                }
                if ready.readable {
                    self.receive(ready.channel);
                }
                if ready.error {
                    self.mark_fault(ready.channel);
                }
            }
            LinkStatus::Down | LinkStatus::Failed => {}
        }
    }

    /// Read until the socket would block, delivering as data arrives
    fn receive(&mut self, channel: ChannelId) {
        loop {
            let Some(conn) = self.registry.get_mut(channel) else {
                return;
            };
            if conn.status != LinkStatus::Up {
                return;
            }
            let Endpoint::Stream(stream) = &mut conn.endpoint else {
                return;
            };

            match conn.rx.fill_from(stream) {
                Ok(0) => {
                    self.link_lost(channel, "peer closed the connection");
                    return;
                }
                Ok(n) => {
                    tracing::trace!(channel = %channel, bytes = n, "received");
                    self.deliver(channel);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::OutOfMemory => {
                    tracing::warn!(channel = %channel, error = %err, "receive truncated");
                    conn.rx.clear();
                }
                Err(err) => {
                    self.link_lost(channel, &err.to_string());
                    return;
                }
            }
        }
    }

    /// Hand every complete message in the receive buffer to the data callback
    fn deliver(&mut self, channel: ChannelId) {
        loop {
            let Some(conn) = self.registry.get_mut(channel) else {
                return;
            };
            let raw = conn.raw_mode;
            let Some(message) = conn.rx.take_message(raw) else {
                return;
            };
            let on_data = conn.on_data.clone();
            on_data(self, channel, &message);
        }
    }

    fn flush_pending(&mut self) {
        let pending = self
            .registry
            .channels_where(|c| c.status == LinkStatus::Up && c.tx.is_some());
        for channel in pending {
            let _ = self.flush_channel(channel);
        }
    }

    fn mark_fault(&mut self, channel: ChannelId) {
        if let Some(conn) = self.registry.get_mut(channel) {
            let kind = match &conn.endpoint {
                Endpoint::Stream(stream) => stream
                    .take_error()
                    .ok()
                    .flatten()
                    .map_or(io::ErrorKind::ConnectionReset, |err| err.kind()),
                _ => io::ErrorKind::NotConnected,
            };
            conn.fault.get_or_insert(kind);
        }
    }

    /// Turn recorded socket faults into link loss
    fn process_faults(&mut self) {
        let faulted = self
            .registry
            .channels_where(|c| c.status == LinkStatus::Up && c.fault.is_some());
        for channel in faulted {
            let reason = self
                .registry
                .get(channel)
                .and_then(|c| c.fault)
                .map(|kind| io::Error::from(kind).to_string())
                .unwrap_or_default();
            self.link_lost(channel, &reason);
        }
    }

    fn process_deferred_closes(&mut self) {
        let ready = self.registry.channels_where(Connection::ready_to_close);
        for channel in ready {
            self.finish_close(channel, false);
        }
    }
}

impl TimerHost for Comms {
    fn timers_mut(&mut self) -> &mut TimerList<Self> {
        &mut self.timers
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::ControlKind;
    use std::cell::RefCell;

    fn test_config() -> CommsConfig {
        CommsConfig::builder()
            .short_backoff_ms(5)
            .long_backoff_ms(50)
            .max_hibernation_ms(20)
            .build()
            .unwrap()
    }

    fn ignore_data() -> impl Fn(&mut Comms, ChannelId, &[u8]) + 'static {
        |_, _, _| {}
    }

    fn ignore_control() -> impl Fn(&mut Comms, &ControlEvent) + 'static {
        |_, _| {}
    }

    fn pump(comms: &mut Comms, mut done: impl FnMut(&Comms) -> bool) -> bool {
        for _ in 0..500 {
            if done(comms) {
                return true;
            }
            comms.poll(10).unwrap();
        }
        done(comms)
    }

    #[test]
    fn test_loopback_frame_delivery() {
        let mut comms = Comms::new(test_config()).unwrap();
        let received = Rc::new(RefCell::new(Vec::new()));
        let events = Rc::new(RefCell::new(Vec::new()));

        let sink = received.clone();
        let server = comms
            .add_server(
                0,
                false,
                move |_, _, payload| sink.borrow_mut().push(payload.to_vec()),
                ignore_control(),
            )
            .unwrap();
        let port = comms.local_port(server).unwrap();
        assert_ne!(port, 0);

        let log = events.clone();
        let client = comms
            .add_client(port, "127.0.0.1", "loopback", ignore_data(), move |_, event| {
                log.borrow_mut().push(event.kind())
            })
            .unwrap();

        assert!(pump(&mut comms, |c| c.status(client) == Some(LinkStatus::Up)));
        assert_eq!(events.borrow().as_slice(), &[ControlKind::Connect]);

        comms.send(client, b"PING").unwrap();
        assert!(pump(&mut comms, |_| !received.borrow().is_empty()));
        assert_eq!(received.borrow()[0], b"PING");
    }

    #[test]
    fn test_accept_fires_new_service_and_shares_callbacks() {
        let mut comms = Comms::new(test_config()).unwrap();
        let services = Rc::new(RefCell::new(Vec::new()));
        let echoed = Rc::new(RefCell::new(Vec::new()));

        let seen = services.clone();
        let server = comms
            .add_server(
                0,
                false,
                |comms, channel, payload| {
                    let _ = comms.send(channel, payload);
                },
                move |_, event| seen.borrow_mut().push(event.clone()),
            )
            .unwrap();
        let port = comms.local_port(server).unwrap();

        let out = echoed.clone();
        let client = comms
            .add_client(
                port,
                "127.0.0.1",
                "echo",
                move |_, _, payload| out.borrow_mut().push(payload.to_vec()),
                ignore_control(),
            )
            .unwrap();

        assert!(pump(&mut comms, |c| c.status(client) == Some(LinkStatus::Up)));
        assert!(pump(&mut comms, |_| !services.borrow().is_empty()));

        let event = services.borrow()[0].clone();
        assert_eq!(event.kind(), ControlKind::NewService);
        assert_eq!(event.address(), "127.0.0.1");
        let service = event.channel();
        assert!(service > client);
        assert_eq!(comms.role(service), Some(Role::Server));
        assert_eq!(comms.status(service), Some(LinkStatus::Up));

        comms.send(client, b"echo me").unwrap();
        assert!(pump(&mut comms, |_| !echoed.borrow().is_empty()));
        assert_eq!(echoed.borrow()[0], b"echo me");
    }

    #[test]
    fn test_send_errors() {
        let mut comms = Comms::new(test_config()).unwrap();
        let server = comms
            .add_server(0, false, ignore_data(), ignore_control())
            .unwrap();
        let client = comms
            .add_client(1, "127.0.0.1", "never", ignore_data(), ignore_control())
            .unwrap();

        let unknown = ChannelId::new(999);
        assert!(matches!(
            comms.send(unknown, b"x"),
            Err(CommsError::InvalidChannel { .. })
        ));
        assert!(matches!(
            comms.send(server, b"x"),
            Err(CommsError::InvalidChannel { .. })
        ));
        assert!(matches!(
            comms.send(client, b"x"),
            Err(CommsError::NoService { .. })
        ));
        assert!(matches!(
            comms.close(unknown),
            Err(CommsError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn test_empty_client_address_rejected() {
        let mut comms = Comms::new(test_config()).unwrap();
        let err = comms
            .add_client(80, "", "nowhere", ignore_data(), ignore_control())
            .unwrap_err();
        assert_eq!(err.error_code(), "ADDRESS_RESOLUTION");
    }

    #[test]
    fn test_channel_ids_increase() {
        let mut comms = Comms::new(test_config()).unwrap();
        let mut last = None;
        for _ in 0..5 {
            let server = comms
                .add_server(0, false, ignore_data(), ignore_control())
                .unwrap();
            let client = comms
                .add_client(9, "127.0.0.1", "c", ignore_data(), ignore_control())
                .unwrap();
            assert!(client > server);
            if let Some(prev) = last {
                assert!(server > prev);
            }
            last = Some(client);
        }
        assert_eq!(comms.connection_count(), 10);
    }

    #[test]
    fn test_close_removes_listener() {
        let mut comms = Comms::new(test_config()).unwrap();
        let server = comms
            .add_server(0, false, ignore_data(), ignore_control())
            .unwrap();
        comms.close(server).unwrap();
        assert_eq!(comms.status(server), Some(LinkStatus::Listening));

        comms.poll(0).unwrap();
        assert_eq!(comms.status(server), None);
        assert_eq!(comms.connection_count(), 0);
    }

    #[test]
    fn test_timer_fires_from_poll() {
        let clock = ManualClock::new(0);
        let mut comms = Comms::with_clock(test_config(), Rc::new(clock.clone())).unwrap();
        let fired = Rc::new(RefCell::new(Vec::new()));

        let log = fired.clone();
        let id = comms.register_timer(
            100,
            TimerMode::OneShot,
            42,
            Rc::new(move |_: &mut Comms, data: u64| log.borrow_mut().push(data)),
        );

        comms.poll(0).unwrap();
        assert!(fired.borrow().is_empty());

        clock.advance(100);
        comms.poll(0).unwrap();
        clock.advance(100);
        comms.poll(0).unwrap();

        assert_eq!(fired.borrow().as_slice(), &[42]);
        assert_eq!(comms.timer_info(id).unwrap().mode, TimerMode::OneShot);
    }

    #[test]
    fn test_close_down_from_timer_stops_loop() {
        let mut comms = Comms::new(test_config()).unwrap();
        comms.register_timer(
            1,
            TimerMode::Astable,
            0,
            Rc::new(|comms: &mut Comms, _: u64| comms.close_down()),
        );

        comms.run_forever().unwrap();
        assert!(comms.is_closing_down());
    }

    #[test]
    fn test_shutdown_handle_is_shared() {
        let comms = Comms::new(test_config()).unwrap();
        let handle = comms.shutdown_handle();
        handle.store(true, Ordering::Relaxed);
        assert!(comms.is_closing_down());
    }

    #[test]
    fn test_raw_mode_requires_channel() {
        let mut comms = Comms::new(test_config()).unwrap();
        assert!(comms.set_raw_mode(ChannelId::new(5), true).is_err());
    }
}

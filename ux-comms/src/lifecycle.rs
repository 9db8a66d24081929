//! Connection lifecycle
//!
//! State transitions driven by the reactor tick:
//!
//! ```text
//!             ┌──────── connect ok ────────┐
//!             │                            ▼
//!  client ─▶ Down ◀── link lost ─────────── Up ──── close ──▶ (removed)
//!             │  ▲                          ▲
//!   fatal     │  └─ in progress / refused   │ accept
//!   error     ▼     (short / long backoff)  │
//!           Failed                      Listening
//! ```
//!
//! A lost server-side connection is torn down; a lost client goes back to
//! `Down` and reconnects after the short backoff.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use mio::net::{TcpListener, TcpStream};
use mio::Poll;
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::event::{ControlEvent, ControlKind};
use crate::reactor::{token, Comms, STREAM_INTEREST};
use crate::registry::{ChannelId, Connection, Endpoint, LinkStatus, Role};

const LISTEN_BACKLOG: i32 = 128;

/// How a connect attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The link is established
    Connected,
    /// Still in flight; check again after the short backoff
    InProgress,
    /// Refused or unreachable; drop the socket and retry after the long backoff
    Retry,
    /// Nothing will change by retrying
    Fatal,
}

/// Classify the error returned by a non-blocking `connect`
pub fn classify_connect_error(err: &io::Error) -> ConnectOutcome {
    if let Some(outcome) = err.raw_os_error().and_then(classify_os_error) {
        return outcome;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ConnectOutcome::InProgress,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::AddrNotAvailable => ConnectOutcome::Retry,
        _ => ConnectOutcome::Fatal,
    }
}

#[cfg(unix)]
fn classify_os_error(code: i32) -> Option<ConnectOutcome> {
    match code {
        libc::EISCONN => Some(ConnectOutcome::Connected),
        libc::EINPROGRESS | libc::EALREADY | libc::EINTR => Some(ConnectOutcome::InProgress),
        libc::ECONNREFUSED
        | libc::ETIMEDOUT
        | libc::ENETUNREACH
        | libc::EHOSTUNREACH
        | libc::ENETDOWN
        | libc::ECONNRESET
        | libc::ECONNABORTED
        | libc::EADDRNOTAVAIL => Some(ConnectOutcome::Retry),
        _ => None,
    }
}

#[cfg(not(unix))]
fn classify_os_error(_code: i32) -> Option<ConnectOutcome> {
    None
}

/// Bind a non-blocking listener on all interfaces with address reuse
pub(crate) fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

fn resolve(address: &str, port: u16) -> io::Result<SocketAddr> {
    (address, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {}", address),
        )
    })
}

fn open_client_socket(target: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    Ok(socket)
}

/// Keepalive on, linger off
fn configure_accepted(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_keepalive(true)?;
    sock.set_linger(None)?;
    Ok(())
}

enum ForkSide {
    Parent,
    Child,
}

/// Leave a forked service process
///
/// `_exit` skips atexit handlers and destructors, which belong to the parent's
/// copy of the program state.
#[cfg(all(unix, feature = "fork"))]
fn exit_service_process(code: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

impl Comms {
    /// Deliver a control event built from the connection's current record
    pub(crate) fn notify(&mut self, channel: ChannelId, kind: ControlKind) {
        let Some(conn) = self.registry.get(channel) else {
            return;
        };
        let event = ControlEvent::new(kind, channel, conn.peer_port, conn.address.clone());
        let on_control = conn.on_control.clone();
        on_control(self, &event);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Client side
    // ───────────────────────────────────────────────────────────────────────

    pub(crate) fn connect_due_clients(&mut self) {
        let now = self.now_ms();
        let due = self.registry.channels_where(|c| {
            c.role == Role::Client
                && c.status == LinkStatus::Down
                && c.down_until <= now
                && !c.close_requested
        });
        for channel in due {
            self.attempt_connect(channel, now);
        }
    }

    fn attempt_connect(&mut self, channel: ChannelId, now: u64) {
        let short = self.config.short_backoff_ms;
        let long = self.config.long_backoff_ms;
        let Some(conn) = self.registry.get_mut(channel) else {
            return;
        };

        if matches!(conn.endpoint, Endpoint::Idle) {
            let opened = resolve(&conn.address, conn.peer_port)
                .and_then(|target| Ok((open_client_socket(target)?, target)));
            match opened {
                Ok((socket, target)) => conn.endpoint = Endpoint::Connecting { socket, target },
                Err(err) => {
                    tracing::warn!(
                        channel = %channel,
                        address = %conn.address,
                        error = %err,
                        retry_in_ms = long,
                        "cannot open client socket"
                    );
                    conn.down_until = now.saturating_add(long);
                    return;
                }
            }
        }

        let Endpoint::Connecting { socket, target } = &conn.endpoint else {
            return;
        };
        let result = match socket.take_error() {
            Ok(Some(err)) | Err(err) => Err(err),
            Ok(None) => socket.connect(&(*target).into()),
        };
        let outcome = match result {
            Ok(()) => ConnectOutcome::Connected,
            Err(ref err) => classify_connect_error(err),
        };

        match outcome {
            ConnectOutcome::Connected => self.link_up(channel),
            ConnectOutcome::InProgress => {
                tracing::trace!(channel = %channel, "connect in progress");
                conn.down_until = now.saturating_add(short);
            }
            ConnectOutcome::Retry => {
                tracing::debug!(
                    channel = %channel,
                    address = %conn.address,
                    port = conn.peer_port,
                    error = ?result.err(),
                    retry_in_ms = long,
                    "connect refused"
                );
                conn.release();
                conn.down_until = now.saturating_add(long);
            }
            ConnectOutcome::Fatal => {
                tracing::error!(
                    channel = %channel,
                    address = %conn.address,
                    port = conn.peer_port,
                    error = ?result.err(),
                    "connect failed"
                );
                conn.release();
                conn.status = LinkStatus::Failed;
                self.notify(channel, ControlKind::LinkFail);
            }
        }
    }

    fn link_up(&mut self, channel: ChannelId) {
        let Some(conn) = self.registry.get_mut(channel) else {
            return;
        };
        let Endpoint::Connecting { socket, target } = mem::replace(&mut conn.endpoint, Endpoint::Idle)
        else {
            return;
        };

        let mut stream = TcpStream::from_std(socket.into());
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token(channel), STREAM_INTEREST)
        {
            tracing::error!(channel = %channel, error = %err, "cannot watch connected socket");
            conn.status = LinkStatus::Failed;
            self.notify(channel, ControlKind::LinkFail);
            return;
        }

        conn.local_port = stream.local_addr().map(|a| a.port()).unwrap_or(0);
        conn.peer_addr = Some(target);
        conn.endpoint = Endpoint::Stream(stream);
        conn.status = LinkStatus::Up;
        conn.rx.clear();
        tracing::info!(channel = %channel, peer = %target, name = %conn.name, "link up");
        self.notify(channel, ControlKind::Connect);
    }

    /// The peer went away or the socket faulted
    pub(crate) fn link_lost(&mut self, channel: ChannelId, reason: &str) {
        let retry_at = self.now_ms().saturating_add(self.config.short_backoff_ms);
        let Some(conn) = self.registry.get_mut(channel) else {
            return;
        };

        match conn.role {
            Role::Server => {
                tracing::info!(channel = %channel, peer = %conn.address, reason, "service link lost");
                self.finish_close(channel, true);
            }
            Role::Client => {
                if let Endpoint::Stream(stream) = &mut conn.endpoint {
                    let _ = self.poll.registry().deregister(stream);
                }
                conn.release();
                conn.fault = None;
                conn.status = LinkStatus::Down;
                conn.down_until = retry_at;
                tracing::warn!(
                    channel = %channel,
                    address = %conn.address,
                    port = conn.peer_port,
                    reason,
                    "link down"
                );
                self.notify(channel, ControlKind::LinkDown);
            }
        }
    }

    /// Remove the record and release its socket
    pub(crate) fn finish_close(&mut self, channel: ChannelId, notify: bool) {
        let Some(mut conn) = self.registry.remove(channel) else {
            return;
        };
        let registry = self.poll.registry();
        let _ = match &mut conn.endpoint {
            Endpoint::Stream(stream) => registry.deregister(stream),
            Endpoint::Listener(listener) => registry.deregister(listener),
            Endpoint::Connecting { .. } | Endpoint::Idle => Ok(()),
        };

        let event = ControlEvent::new(
            ControlKind::LinkFail,
            channel,
            conn.peer_port,
            conn.address.clone(),
        );
        let on_control = conn.on_control.clone();
        conn.release();
        tracing::debug!(channel = %channel, role = ?conn.role, notify, "connection closed");
        drop(conn);

        if notify {
            on_control(self, &event);
        }
        if self.service_channel == Some(channel) {
            self.end_service_process();
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Server side
    // ───────────────────────────────────────────────────────────────────────

    /// Accept until the listener would block
    pub(crate) fn accept_pending(&mut self, listener: ChannelId) {
        loop {
            let Some(server) = self.registry.get(listener) else {
                return;
            };
            let Endpoint::Listener(socket) = &server.endpoint else {
                return;
            };
            let fork_on_accept = server.fork_on_accept;

            let (stream, peer) = match socket.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(channel = %listener, error = %err, "accept failed");
                    return;
                }
            };
            if let Err(err) = configure_accepted(&stream) {
                tracing::warn!(channel = %listener, peer = %peer, error = %err, "socket options not applied");
            }

            if fork_on_accept {
                match self.fork_service(listener, stream, peer) {
                    ForkSide::Parent => continue,
                    ForkSide::Child => return,
                }
            }
            self.register_service(listener, stream, peer);
        }
    }

    /// Register an accepted stream as a new service connection
    fn register_service(&mut self, listener: ChannelId, mut stream: TcpStream, peer: SocketAddr) {
        let channel = self.registry.next_channel();
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token(channel), STREAM_INTEREST)
        {
            tracing::warn!(channel = %listener, peer = %peer, error = %err, "cannot watch accepted socket");
            return;
        }
        let Some(server) = self.registry.get(listener) else {
            return;
        };
        let conn = Connection::accepted(channel, server, stream, peer, &self.config);
        self.registry.insert(conn);
        tracing::info!(channel = %channel, server = %listener, peer = %peer, "accepted connection");
        self.notify(channel, ControlKind::NewService);
    }

    #[cfg(all(unix, feature = "fork"))]
    fn fork_service(&mut self, listener: ChannelId, stream: TcpStream, peer: SocketAddr) -> ForkSide {
        // SAFETY: the reactor is single-threaded; the child only touches its
        // own copy of the process state.
        match unsafe { libc::fork() } {
            -1 => {
                let err = io::Error::last_os_error();
                tracing::error!(channel = %listener, error = %err, "fork failed, serving in-process");
                self.register_service(listener, stream, peer);
                ForkSide::Parent
            }
            0 => {
                self.become_service_child(listener, stream, peer);
                ForkSide::Child
            }
            pid => {
                drop(stream);
                self.children.push(pid);
                tracing::info!(channel = %listener, peer = %peer, pid, "forked service process");
                ForkSide::Parent
            }
        }
    }

    #[cfg(not(all(unix, feature = "fork")))]
    fn fork_service(&mut self, listener: ChannelId, stream: TcpStream, peer: SocketAddr) -> ForkSide {
        tracing::warn!(channel = %listener, "fork on accept unavailable, serving in-process");
        self.register_service(listener, stream, peer);
        ForkSide::Parent
    }

    /// Reduce a forked child to a reactor serving only `stream`
    #[cfg(all(unix, feature = "fork"))]
    fn become_service_child(&mut self, listener: ChannelId, stream: TcpStream, peer: SocketAddr) {
        let channel = self.registry.next_channel();
        let Some(server) = self.registry.get(listener) else {
            exit_service_process(1);
        };
        let mut conn = Connection::accepted(channel, server, stream, peer, &self.config);

        // Inherited registrations live in the epoll instance shared with the
        // parent; close the copies without deregistering them.
        drop(self.registry.retain_only(None));
        self.children.clear();
        self.timers = crate::timer::TimerList::new();
        match Poll::new() {
            Ok(poll) => self.poll = poll,
            Err(err) => {
                tracing::error!(error = %err, "cannot create poller in service process");
                exit_service_process(1);
            }
        }

        if let Endpoint::Stream(stream) = &mut conn.endpoint {
            if let Err(err) = self
                .poll
                .registry()
                .register(stream, token(channel), STREAM_INTEREST)
            {
                tracing::error!(channel = %channel, error = %err, "cannot watch service socket");
                exit_service_process(1);
            }
        }
        self.registry.insert(conn);
        self.service_channel = Some(channel);
        tracing::info!(channel = %channel, peer = %peer, pid = std::process::id(), "serving in child process");
        self.notify(channel, ControlKind::NewService);
    }

    /// The child's only connection is gone
    #[cfg(all(unix, feature = "fork"))]
    fn end_service_process(&mut self) -> ! {
        self.close_down();
        tracing::info!(pid = std::process::id(), "service process exiting");
        exit_service_process(0)
    }

    #[cfg(not(all(unix, feature = "fork")))]
    fn end_service_process(&mut self) {
        self.close_down();
    }

    /// Collect exited service processes without blocking
    #[cfg(all(unix, feature = "fork"))]
    pub(crate) fn reap_children(&mut self) {
        self.children.retain(|&pid| {
            let mut status = 0;
            // SAFETY: WNOHANG never blocks; `status` outlives the call.
            match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
                0 => true,
                -1 => false,
                _ => {
                    tracing::debug!(pid, status, "service process exited");
                    false
                }
            }
        });
    }

    #[cfg(not(all(unix, feature = "fork")))]
    pub(crate) fn reap_children(&mut self) {}
}

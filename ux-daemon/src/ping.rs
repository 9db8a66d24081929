//! One-shot request: connect, send one payload, wait for one reply

use std::cell::RefCell;
use std::rc::Rc;

use ux_comms::{Comms, CommsConfig, ControlKind, TimerMode};

use crate::error::{DaemonError, DaemonResult};

/// Where and how to send the request
#[derive(Debug, Clone)]
pub struct PingOptions {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub raw_mode: bool,
}

enum Outcome {
    Reply(Vec<u8>),
    Failed,
    TimedOut,
}

/// Send `payload` and return the first reply
///
/// The deadline is a one-shot timer on the transport's timer list; the
/// client keeps retrying the connection until it fires.
pub fn ping(options: &PingOptions, payload: &[u8], config: CommsConfig) -> DaemonResult<Vec<u8>> {
    let mut comms = Comms::new(config)?;
    let outcome: Rc<RefCell<Option<Outcome>>> = Rc::new(RefCell::new(None));

    let on_reply = outcome.clone();
    let on_link = outcome.clone();
    let request = payload.to_vec();
    let client = comms.add_client(
        options.port,
        &options.host,
        "ping",
        move |comms, _, reply| {
            on_reply
                .borrow_mut()
                .get_or_insert_with(|| Outcome::Reply(reply.to_vec()));
            comms.close_down();
        },
        move |comms, event| match event.kind() {
            ControlKind::Connect => {
                tracing::debug!(channel = %event.channel(), len = request.len(), "sending request");
                if let Err(err) = comms.block_send(event.channel(), &request) {
                    tracing::warn!(error = %err, "request not sent");
                    on_link.borrow_mut().get_or_insert(Outcome::Failed);
                    comms.close_down();
                }
            }
            ControlKind::LinkDown | ControlKind::LinkFail => {
                on_link.borrow_mut().get_or_insert(Outcome::Failed);
                comms.close_down();
            }
            ControlKind::NewService => {}
        },
    )?;
    if options.raw_mode {
        comms.set_raw_mode(client, true)?;
    }

    let on_timeout = outcome.clone();
    comms.register_timer(
        options.timeout_ms,
        TimerMode::OneShot,
        0,
        Rc::new(move |comms: &mut Comms, _: u64| {
            on_timeout.borrow_mut().get_or_insert(Outcome::TimedOut);
            comms.close_down();
        }),
    );

    comms.run_forever()?;

    let result = outcome.borrow_mut().take();
    match result {
        Some(Outcome::Reply(reply)) => Ok(reply),
        Some(Outcome::Failed) => Err(DaemonError::LinkFailed {
            address: options.host.clone(),
            port: options.port,
        }),
        Some(Outcome::TimedOut) | None => Err(DaemonError::Timeout {
            timeout_ms: options.timeout_ms,
        }),
    }
}

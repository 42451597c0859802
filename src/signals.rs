//! Named lifecycle events with ordered, fire-and-continue subscribers.
//!
//! Subscribers observe; they cannot alter the flow. A subscriber that returns an error or
//! panics is logged and the remaining subscribers still run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::Error;
use crate::ids::ConnectionId;
use crate::server::Request;

/// Events a subscriber can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ConnectionOpened,
    RequestReceived,
    PipelineError,
    ResponseSent,
    ConnectionClosed,
    ServerStarting,
    ServerStarted,
    ServerStopping,
    ServerStopped,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What is known about the connection an event belongs to.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub requests_served: u64,
}

/// Payload handed to subscribers. Fields are filled when relevant to the signal.
#[derive(Clone, Copy)]
pub struct SignalEvent<'a> {
    pub signal: Signal,
    pub connection: Option<&'a ConnectionInfo>,
    pub request: Option<&'a Request>,
    pub status: Option<u16>,
    pub error: Option<&'a Error>,
    /// Listening address for server lifecycle events.
    pub local_addr: Option<SocketAddr>,
}

impl<'a> SignalEvent<'a> {
    #[must_use]
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            connection: None,
            request: None,
            status: None,
            error: None,
            local_addr: None,
        }
    }

    #[must_use]
    pub fn connection(mut self, conn: &'a ConnectionInfo) -> Self {
        self.connection = Some(conn);
        self
    }

    #[must_use]
    pub fn request(mut self, req: &'a Request) -> Self {
        self.request = Some(req);
        self
    }

    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn error(mut self, err: &'a Error) -> Self {
        self.error = Some(err);
        self
    }

    #[must_use]
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }
}

pub type Subscriber = Arc<dyn Fn(&SignalEvent<'_>) -> Result<(), Error> + Send + Sync>;

/// Subscriber table, frozen once the application is built.
#[derive(Default, Clone)]
pub struct Signals {
    subscribers: HashMap<Signal, Vec<Subscriber>>,
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Signals {
    pub fn subscribe(&mut self, signal: Signal, subscriber: Subscriber) {
        self.subscribers.entry(signal).or_default().push(subscriber);
    }

    #[must_use]
    pub fn subscriber_count(&self, signal: Signal) -> usize {
        self.subscribers.get(&signal).map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its signal, in registration order.
    pub fn fire(&self, event: &SignalEvent<'_>) {
        let Some(subs) = self.subscribers.get(&event.signal) else {
            return;
        };
        for (idx, sub) in subs.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| sub(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    signal = %event.signal,
                    subscriber_idx = idx,
                    error = %err,
                    "Signal subscriber failed"
                ),
                Err(panic) => error!(
                    signal = %event.signal,
                    subscriber_idx = idx,
                    panic_message = %panic_message(panic.as_ref()),
                    "Signal subscriber panicked"
                ),
            }
        }
    }
}

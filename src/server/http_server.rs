use dashmap::DashMap;
use may::coroutine::{self, JoinHandle};
use may::net::{TcpListener, TcpStream};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::protocol::Protocol;
use crate::config::HttpConfig;
use crate::dispatcher::Dispatcher;
use crate::ids::ConnectionId;
use crate::signals::{panic_message, Signal, SignalEvent};

/// How long a forced close waits for connection coroutines to unwind.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A live connection as seen by the server: a second handle on the socket, used only to
/// shut it down, and the protocol's idle flag.
struct Tracked {
    stream: TcpStream,
    idle: Arc<AtomicBool>,
}

#[derive(Default)]
struct Shared {
    stopping: Arc<AtomicBool>,
    connections: DashMap<ConnectionId, Tracked>,
}

impl Shared {
    /// Shut down connections, all of them or only those waiting for a request. Returns
    /// how many were shut down.
    fn shutdown_connections(&self, idle_only: bool) -> usize {
        let mut count = 0;
        for entry in self.connections.iter() {
            if idle_only && !entry.idle.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = entry.stream.shutdown(Shutdown::Both) {
                debug!(conn_id = %entry.key(), error = %e, "Connection already gone");
            }
            count += 1;
        }
        count
    }

    fn wait_drained(&self, deadline: Instant, idle_sweep: bool) -> bool {
        loop {
            if self.connections.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if idle_sweep {
                self.shutdown_connections(true);
            }
            coroutine::sleep(POLL_INTERVAL);
        }
    }
}

/// Accepts TCP connections and runs one [`Protocol`] coroutine per connection.
pub struct HttpServer {
    dispatcher: Arc<Dispatcher>,
    http: HttpConfig,
}

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the accept loop.
pub struct ServerHandle {
    addr: SocketAddr,
    accept: JoinHandle<()>,
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
    graceful: Duration,
}

impl ServerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open connections right now.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        let target = connectable(self.addr);
        for _ in 0..50 {
            if std::net::TcpStream::connect(target).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop the server gracefully
    ///
    /// Stops accepting, disables keep-alive, closes idle connections and waits up to the
    /// configured graceful period for in-flight requests before force-closing the rest.
    pub fn stop(self) {
        let signals = self.dispatcher.signals();
        signals.fire(&SignalEvent::new(Signal::ServerStopping).local_addr(self.addr));
        info!(addr = %self.addr, open_connections = self.connection_count(), "Server stopping");

        self.shared.stopping.store(true, Ordering::Release);
        // Wake the accept loop; it checks the flag after every accept.
        if let Err(e) = std::net::TcpStream::connect(connectable(self.addr)) {
            debug!(error = %e, "Wake-up connection failed");
        }
        if let Err(panic) = self.accept.join() {
            error!(panic_message = %panic_message(panic.as_ref()), "Accept loop panicked");
        }

        let idle = self.shared.shutdown_connections(true);
        debug!(closed = idle, "Idle connections closed");
        let drained = self
            .shared
            .wait_drained(Instant::now() + self.graceful, true);
        if !drained {
            let forced = self.shared.shutdown_connections(false);
            warn!(
                forced,
                graceful_secs = self.graceful.as_secs(),
                "Graceful shutdown period elapsed, closing remaining connections"
            );
            if !self
                .shared
                .wait_drained(Instant::now() + FORCE_CLOSE_GRACE, false)
            {
                warn!(
                    remaining = self.shared.connections.len(),
                    "Connections still open after forced close"
                );
            }
        }

        info!(addr = %self.addr, "Server stopped");
        signals.fire(&SignalEvent::new(Signal::ServerStopped).local_addr(self.addr));
    }

    /// Wait for the accept loop to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop panicked.
    pub fn join(self) -> std::thread::Result<()> {
        self.accept.join()
    }
}

/// Wildcard bind addresses are not connectable; use loopback instead.
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(a) if a.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, a.port()))
        }
        SocketAddr::V6(a) if a.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, a.port()))
        }
        other => other,
    }
}

impl HttpServer {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, http: HttpConfig) -> Self {
        Self { dispatcher, http }
    }

    /// Bind `addr` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let signals = self.dispatcher.signals();
        signals.fire(&SignalEvent::new(Signal::ServerStarting).local_addr(addr));

        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        let shared = Arc::new(Shared::default());
        let graceful = self.http.graceful_shutdown();
        let keep_alive = self.http.keep_alive;
        let dispatcher = Arc::clone(&self.dispatcher);

        let loop_shared = Arc::clone(&shared);
        // SAFETY: `Builder::spawn` is unsafe in `may`. The accept loop owns the listener
        // and only shares `Arc`ed state.
        let accept = unsafe {
            coroutine::Builder::new()
                .name("machwire-accept".to_string())
                .spawn(move || self.accept_loop(listener, &loop_shared))
        }?;

        info!(
            addr = %local,
            keep_alive,
            "Server listening"
        );
        dispatcher
            .signals()
            .fire(&SignalEvent::new(Signal::ServerStarted).local_addr(local));

        Ok(ServerHandle {
            addr: local,
            accept,
            shared,
            dispatcher,
            graceful,
        })
    }

    fn accept_loop(self, listener: TcpListener, shared: &Arc<Shared>) {
        for stream in listener.incoming() {
            if shared.stopping.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => self.spawn_connection(stream, shared),
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
        debug!("Accept loop finished");
    }

    fn spawn_connection(&self, stream: TcpStream, shared: &Arc<Shared>) {
        let tracked = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Could not register connection, dropping it");
                return;
            }
        };
        let idle = Arc::new(AtomicBool::new(true));
        let protocol = Protocol::new(stream, Arc::clone(&self.dispatcher), self.http.clone())
            .with_flags(Arc::clone(&shared.stopping), Arc::clone(&idle));
        let id = protocol.connection().id;
        shared.connections.insert(
            id,
            Tracked {
                stream: tracked,
                idle,
            },
        );

        let conn_shared = Arc::clone(shared);
        // SAFETY: as for the accept loop; the connection coroutine owns its protocol.
        let spawned = unsafe {
            coroutine::Builder::new()
                .name(id.to_string())
                .spawn(move || {
                    protocol.run();
                    conn_shared.connections.remove(&id);
                })
        };
        if let Err(e) = spawned {
            error!(conn_id = %id, error = %e, "Failed to spawn connection coroutine");
            shared.connections.remove(&id);
        }
    }
}

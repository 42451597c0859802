//! Per-connection HTTP/1.1 state machine.
//!
//! ```text
//! AwaitingRequest -> ReadingHeaders -> ReadingBody -> Dispatching -> WritingResponse
//!        ^                                                                 |
//!        +--------------------------- keep-alive --------------------------+
//!                                                                          v
//!                                                                       Closing
//! ```
//!
//! Protocol-level failures (malformed head, oversized head or body, request timeout) are
//! answered directly without entering the pipeline, and the connection is closed.

use bytes::{Buf, Bytes, BytesMut};
use http::{Method, Version};
use may::coroutine;
use may::net::TcpStream;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use super::codec::{
    encode_chunk, encode_head, is_bodyless, parse_head, BodyEncoding, ChunkedDecoder, Decoded,
    Framing, HeadError, RequestHead, LAST_CHUNK,
};
use super::request::{body_channel, Request};
use super::response::{Response, ResponseBody};
use crate::config::HttpConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, ErrorKind};
use crate::ids::{ConnectionId, RequestId, REQUEST_ID_HEADER};
use crate::signals::{ConnectionInfo, Signal, SignalEvent};

const READ_CHUNK: usize = 8192;

/// A byte stream the protocol can drive. Implemented for `may` TCP streams; tests supply
/// in-memory versions.
pub trait Transport: Read + Write + Send {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingRequest,
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    Closing,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a request body could not be read in full.
#[derive(Debug)]
enum BodyError {
    TooLarge,
    Malformed(&'static str),
    Timeout,
    Closed,
    Io(io::Error),
}

impl BodyError {
    fn to_error(&self) -> Error {
        match self {
            BodyError::TooLarge => Error::new(ErrorKind::PayloadTooLarge, "Payload Too Large"),
            BodyError::Malformed(why) => Error::invalid_usage(*why),
            BodyError::Timeout => Error::new(ErrorKind::RequestTimeout, "Request Timeout"),
            BodyError::Closed => Error::invalid_usage("connection closed before the body was complete"),
            BodyError::Io(e) => Error::server_error(format!("reading request body: {e}")),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Drives one connection until it closes.
pub struct Protocol<T: Transport> {
    transport: T,
    dispatcher: Arc<Dispatcher>,
    http: HttpConfig,
    state: State,
    buf: BytesMut,
    conn: ConnectionInfo,
    stopping: Arc<AtomicBool>,
    idle: Arc<AtomicBool>,
    closed: bool,
}

impl<T: Transport> Protocol<T> {
    pub fn new(transport: T, dispatcher: Arc<Dispatcher>, http: HttpConfig) -> Self {
        let peer = transport.peer_addr().ok();
        Self {
            transport,
            dispatcher,
            http,
            state: State::AwaitingRequest,
            buf: BytesMut::with_capacity(READ_CHUNK),
            conn: ConnectionInfo {
                id: ConnectionId::next(),
                peer,
                requests_served: 0,
            },
            stopping: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(AtomicBool::new(true)),
            closed: false,
        }
    }

    /// Share the server's stop flag and expose this connection's idle flag to it.
    #[must_use]
    pub(crate) fn with_flags(mut self, stopping: Arc<AtomicBool>, idle: Arc<AtomicBool>) -> Self {
        self.stopping = stopping;
        self.idle = idle;
        self
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionInfo {
        &self.conn
    }

    /// Serve requests until the connection closes.
    pub fn run(mut self) {
        self.fire(SignalEvent::new(Signal::ConnectionOpened));
        debug!(conn_id = %self.conn.id, peer = ?self.conn.peer, "Connection opened");

        while self.state != State::Closing {
            match self.serve_one() {
                Ok(true) => self.transition(State::AwaitingRequest),
                Ok(false) => self.transition(State::Closing),
                Err(e) => {
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionAborted
                    ) || is_timeout(&e)
                    {
                        debug!(conn_id = %self.conn.id, error = %e, "Connection dropped");
                    } else {
                        warn!(conn_id = %self.conn.id, error = %e, "Connection I/O error");
                    }
                    self.transition(State::Closing);
                }
            }
        }
        self.close();
    }

    fn transition(&mut self, to: State) {
        if self.state != to {
            trace!(conn_id = %self.conn.id, from = %self.state, to = %to, "Protocol state transition");
            self.state = to;
        }
        self.idle
            .store(to == State::AwaitingRequest && self.buf.is_empty(), Ordering::Release);
    }

    fn fire<'a>(&'a self, event: SignalEvent<'a>) {
        self.dispatcher.signals().fire(&event.connection(&self.conn));
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Handle one request. `Ok(true)` keeps the connection alive.
    fn serve_one(&mut self) -> io::Result<bool> {
        let Some(head) = self.read_head()? else {
            return Ok(false);
        };
        let started = Instant::now();
        let deadline = started + self.http.request_timeout();

        let framing = match head.framing() {
            Ok(f) => f,
            Err(HeadError::Malformed(why)) => {
                debug!(conn_id = %self.conn.id, reason = why, "Rejected request framing");
                self.write_error(400, "Bad Request");
                return Ok(false);
            }
            Err(HeadError::TooLarge) => {
                self.write_error(431, "Request Header Fields Too Large");
                return Ok(false);
            }
        };
        if let Framing::Length(len) = framing {
            if len > self.http.request_max_size {
                debug!(conn_id = %self.conn.id, content_length = len, "Declared body too large");
                self.write_error(413, "Payload Too Large");
                return Ok(false);
            }
        }

        let keep_alive_requested = head.wants_keep_alive();
        let expects_continue = head.expects_continue() && head.version == Version::HTTP_11;
        let method = head.method.clone();
        let version = head.version;
        let mut req = self.build_request(head);

        if expects_continue && framing != Framing::Empty {
            self.transport.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
        }

        let streaming = self.dispatcher.prepare(&mut req);
        self.transition(State::ReadingBody);

        let mut force_close = false;
        let (req, mut res) = if streaming {
            match self.dispatch_streaming(req, framing, deadline, &mut force_close)? {
                Some(done) => done,
                None => return Ok(false),
            }
        } else {
            let mut body = BytesMut::new();
            if let Err(e) = self.read_body(framing, deadline, &mut |chunk| body.extend_from_slice(&chunk)) {
                self.reject_body(&e);
                return Ok(false);
            }
            let mut req = req.with_body(body.freeze());
            self.transition(State::Dispatching);
            let res = self.dispatcher.dispatch(&mut req, Some(&self.conn));
            (req, res)
        };

        let bodyless = is_bodyless(&method, res.status());
        let close_delimited =
            version == Version::HTTP_10 && !bodyless && matches!(res.body(), ResponseBody::Stream(_));
        let response_closes = res
            .header("connection")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"));
        let keep_alive = self.http.keep_alive
            && keep_alive_requested
            && !self.stopping()
            && !force_close
            && !close_delimited
            && !response_closes
            && (self.http.max_requests == 0
                || self.conn.requests_served + 1 < self.http.max_requests);

        self.write_response(&method, version, &mut res, keep_alive)?;
        self.conn.requests_served += 1;

        debug!(
            conn_id = %self.conn.id,
            request_id = %req.request_id(),
            method = %method,
            path = %req.path(),
            status = res.status(),
            keep_alive,
            duration_us = started.elapsed().as_micros() as u64,
            "Response written"
        );
        self.fire(
            SignalEvent::new(Signal::ResponseSent)
                .request(&req)
                .status(res.status()),
        );
        Ok(keep_alive)
    }

    /// Wait for and parse a request head. `None` means the connection should close; any
    /// error response has already been written.
    fn read_head(&mut self) -> io::Result<Option<RequestHead>> {
        let mut deadline: Option<Instant> = None;
        loop {
            if deadline.is_none() && !self.buf.is_empty() {
                self.transition(State::ReadingHeaders);
                deadline = Some(Instant::now() + self.http.request_timeout());
            }
            if deadline.is_some() {
                match parse_head(&self.buf, self.http.max_header_size) {
                    Ok(Some((head, used))) => {
                        self.buf.advance(used);
                        return Ok(Some(head));
                    }
                    Ok(None) => {}
                    Err(HeadError::TooLarge) => {
                        debug!(conn_id = %self.conn.id, buffered = self.buf.len(), "Request head too large");
                        self.write_error(431, "Request Header Fields Too Large");
                        return Ok(None);
                    }
                    Err(HeadError::Malformed(why)) => {
                        debug!(conn_id = %self.conn.id, reason = why, "Malformed request head");
                        self.write_error(400, "Bad Request");
                        return Ok(None);
                    }
                }
            } else if self.stopping() {
                return Ok(None);
            }

            let timeout = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None if self.conn.requests_served == 0 => self.http.request_timeout(),
                None => self.http.keep_alive_timeout(),
            };
            match self.fill(timeout) {
                Ok(0) => {
                    if deadline.is_some() {
                        debug!(conn_id = %self.conn.id, "Peer closed mid-request");
                    }
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) if is_timeout(&e) => {
                    if deadline.is_some() {
                        self.write_error(408, "Request Timeout");
                    } else {
                        debug!(conn_id = %self.conn.id, "Idle connection timed out");
                    }
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fill(&mut self, timeout: Duration) -> io::Result<usize> {
        if timeout.is_zero() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        self.transport.set_read_timeout(Some(timeout))?;
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.transport.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn fill_until(&mut self, deadline: Instant) -> Result<(), BodyError> {
        match self.fill(deadline.saturating_duration_since(Instant::now())) {
            Ok(0) => Err(BodyError::Closed),
            Ok(_) => Ok(()),
            Err(e) if is_timeout(&e) => Err(BodyError::Timeout),
            Err(e) => Err(BodyError::Io(e)),
        }
    }

    fn build_request(&self, head: RequestHead) -> Request {
        let mut req = Request::new(head.method, head.target)
            .with_version(head.version)
            .with_peer(self.conn.peer);
        for (name, value) in head.headers {
            req.append_header(&name, value);
        }
        let id = RequestId::from_header_or_new(req.header(REQUEST_ID_HEADER));
        req.set_request_id(id);
        req
    }

    /// Read the body off the socket, handing each piece to `sink`.
    fn read_body(
        &mut self,
        framing: Framing,
        deadline: Instant,
        sink: &mut dyn FnMut(Bytes),
    ) -> Result<(), BodyError> {
        match framing {
            Framing::Empty => Ok(()),
            Framing::Length(len) => {
                let mut remaining = len;
                while remaining > 0 {
                    if self.buf.is_empty() {
                        self.fill_until(deadline)?;
                    }
                    let n = remaining.min(self.buf.len() as u64) as usize;
                    sink(self.buf.split_to(n).freeze());
                    remaining -= n as u64;
                }
                Ok(())
            }
            Framing::Chunked => {
                let mut decoder = ChunkedDecoder::new();
                let mut total = 0u64;
                loop {
                    match decoder.decode(&mut self.buf) {
                        Ok(Decoded::Chunk(chunk)) => {
                            total += chunk.len() as u64;
                            if total > self.http.request_max_size {
                                return Err(BodyError::TooLarge);
                            }
                            sink(chunk);
                        }
                        Ok(Decoded::NeedMore) => self.fill_until(deadline)?,
                        Ok(Decoded::Done) => return Ok(()),
                        Err(HeadError::Malformed(why)) => return Err(BodyError::Malformed(why)),
                        Err(HeadError::TooLarge) => return Err(BodyError::TooLarge),
                    }
                }
            }
        }
    }

    fn reject_body(&mut self, err: &BodyError) {
        debug!(conn_id = %self.conn.id, error = ?err, "Request body rejected");
        match err {
            BodyError::TooLarge => self.write_error(413, "Payload Too Large"),
            BodyError::Malformed(_) => self.write_error(400, "Bad Request"),
            BodyError::Timeout => self.write_error(408, "Request Timeout"),
            BodyError::Closed | BodyError::Io(_) => {}
        }
    }

    /// Run the pipeline in its own coroutine while this one feeds it the body.
    ///
    /// A body error is delivered to the handler through the stream and forces the
    /// connection closed once the response is written.
    fn dispatch_streaming(
        &mut self,
        req: Request,
        framing: Framing,
        deadline: Instant,
        force_close: &mut bool,
    ) -> io::Result<Option<(Request, Response)>> {
        let (tx, rx) = body_channel();
        let mut req = req.with_stream(rx);
        let dispatcher = Arc::clone(&self.dispatcher);
        let conn = self.conn.clone();
        self.transition(State::Dispatching);

        // SAFETY: `Builder::spawn` is unsafe in `may`. The closure owns everything it
        // touches and the handle is joined before this function returns.
        let handle = unsafe {
            coroutine::Builder::new()
                .name(format!("{}-pipeline", self.conn.id))
                .spawn(move || {
                    let res = dispatcher.dispatch(&mut req, Some(&conn));
                    (req, res)
                })
        }?;

        let mut open = true;
        let outcome = self.read_body(framing, deadline, &mut |chunk| {
            if open && !tx.send(chunk) {
                open = false;
            }
        });
        if let Err(e) = outcome {
            debug!(conn_id = %self.conn.id, error = ?e, "Streaming request body failed");
            tx.fail(e.to_error());
            *force_close = true;
        } else {
            drop(tx);
        }

        match handle.join() {
            Ok(done) => Ok(Some(done)),
            Err(panic) => {
                error!(
                    conn_id = %self.conn.id,
                    panic_message = %crate::signals::panic_message(panic.as_ref()),
                    "Pipeline coroutine died"
                );
                self.write_error(500, "Internal Server Error");
                Ok(None)
            }
        }
    }

    fn write_response(
        &mut self,
        method: &Method,
        version: Version,
        res: &mut Response,
        keep_alive: bool,
    ) -> io::Result<()> {
        self.transition(State::WritingResponse);
        self.transport
            .set_write_timeout(Some(self.http.request_timeout()))?;
        let keep_alive = keep_alive.then_some(self.http.keep_alive_timeout_secs);
        let head_only = is_bodyless(method, res.status());
        let no_length = (100..200).contains(&res.status()) || res.status() == 204 || res.status() == 304;

        match res.take_body() {
            ResponseBody::Stream(chunks) if !head_only => {
                let chunked = version != Version::HTTP_10;
                let encoding = if chunked {
                    BodyEncoding::Chunked
                } else {
                    BodyEncoding::CloseDelimited
                };
                self.transport
                    .write_all(&encode_head(res, version, keep_alive, encoding))?;
                for chunk in chunks {
                    let chunk = chunk.map_err(|e| {
                        error!(conn_id = %self.conn.id, error = %e, "Response stream failed mid-body");
                        io::Error::other(e.to_string())
                    })?;
                    if chunk.is_empty() {
                        continue;
                    }
                    if chunked {
                        self.transport.write_all(&encode_chunk(&chunk))?;
                    } else {
                        self.transport.write_all(&chunk)?;
                    }
                }
                if chunked {
                    self.transport.write_all(LAST_CHUNK)?;
                }
            }
            ResponseBody::Stream(_) => {
                self.transport
                    .write_all(&encode_head(res, version, keep_alive, BodyEncoding::None))?;
            }
            ResponseBody::Full(body) => {
                let encoding = if no_length {
                    BodyEncoding::None
                } else {
                    BodyEncoding::Length(body.len())
                };
                self.transport
                    .write_all(&encode_head(res, version, keep_alive, encoding))?;
                if !head_only {
                    self.transport.write_all(&body)?;
                }
            }
            ResponseBody::Empty => {
                let encoding = if no_length {
                    BodyEncoding::None
                } else {
                    BodyEncoding::Length(0)
                };
                self.transport
                    .write_all(&encode_head(res, version, keep_alive, encoding))?;
            }
        }
        self.transport.flush()
    }

    /// Answer a protocol-level failure directly. The connection closes afterwards.
    fn write_error(&mut self, status: u16, message: &str) {
        self.transition(State::WritingResponse);
        let res = Response::plain(status, format!("Error: {message}"));
        let body = res.body_bytes().cloned().unwrap_or_default();
        let head = encode_head(&res, Version::HTTP_11, None, BodyEncoding::Length(body.len()));
        let written = self
            .transport
            .set_write_timeout(Some(self.http.request_timeout()))
            .and_then(|()| self.transport.write_all(&head))
            .and_then(|()| self.transport.write_all(&body))
            .and_then(|()| self.transport.flush());
        match written {
            Ok(()) => self.fire(SignalEvent::new(Signal::ResponseSent).status(status)),
            Err(e) => debug!(conn_id = %self.conn.id, status, error = %e, "Connection lost before error written"),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transition(State::Closing);
        self.idle.store(false, Ordering::Release);
        if let Err(e) = self.transport.shutdown() {
            trace!(conn_id = %self.conn.id, error = %e, "Transport shutdown failed");
        }
        debug!(
            conn_id = %self.conn.id,
            requests_served = self.conn.requests_served,
            "Connection closed"
        );
        self.fire(SignalEvent::new(Signal::ConnectionClosed));
    }
}

impl<T: Transport> Drop for Protocol<T> {
    fn drop(&mut self) {
        self.close();
    }
}

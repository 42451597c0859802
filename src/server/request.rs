//! Inbound request model.
//!
//! A [`Request`] is created by the protocol once the request head has been parsed. The
//! body is either fully buffered or, for routes registered with `stream`, a one-shot
//! [`BodyStream`] fed by the connection while the handler runs.

use bytes::{Bytes, BytesMut};
use http::{Extensions, Method, Version};
use may::sync::mpsc;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;
use std::net::SocketAddr;
use std::sync::Arc;

use super::form::{parse_multipart, split_params, FormData, UploadedFile};
use crate::error::{Error, ErrorKind};
use crate::ids::RequestId;
use crate::router::{ParamValue, ParamVec, Route, RouteMatch};

/// Maximum number of headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Ordered request headers. Names are stored lowercase; repeated headers keep every value.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Producer half of a streaming request body.
pub struct BodySender {
    tx: mpsc::Sender<Result<Bytes, Error>>,
}

impl BodySender {
    /// Push a chunk. Returns `false` once the consumer is gone.
    pub fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).is_ok()
    }

    /// Abort the stream; the consumer sees `err` as its next item.
    pub fn fail(self, err: Error) {
        if self.tx.send(Err(err)).is_err() {
            tracing::trace!("request body consumer already gone");
        }
    }
}

/// Consumer half of a streaming request body. Yields chunks until the sender is dropped.
pub struct BodyStream {
    rx: mpsc::Receiver<Result<Bytes, Error>>,
}

impl BodyStream {
    /// Drain the remaining chunks into one buffer.
    pub fn collect_bytes(self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        for chunk in self {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream").finish_non_exhaustive()
    }
}

impl Iterator for BodyStream {
    type Item = Result<Bytes, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

/// Create a connected body sender/stream pair.
#[must_use]
pub fn body_channel() -> (BodySender, BodyStream) {
    let (tx, rx) = mpsc::channel();
    (BodySender { tx }, BodyStream { rx })
}

enum Body {
    Full(Bytes),
    Stream(BodyStream),
    /// A stream drained by `body()`; the bytes are kept only for the borrow handed out.
    Drained(Bytes),
    Consumed,
}

fn already_consumed() -> Error {
    Error::new(
        ErrorKind::BodyAlreadyConsumed,
        "request body stream was already consumed",
    )
}

/// An HTTP request as seen by middleware and handlers.
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderVec,
    body: Body,
    route: Option<Arc<Route>>,
    params: ParamVec,
    request_id: RequestId,
    peer: Option<SocketAddr>,
    extensions: Extensions,
    pub(crate) resolution: Option<Result<RouteMatch, Error>>,
}

impl Request {
    /// Build a request with an empty buffered body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderVec::new(),
            body: Body::Full(Bytes::new()),
            route: None,
            params: ParamVec::new(),
            request_id: RequestId::new(),
            peer: None,
            extensions: Extensions::new(),
            resolution: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.append_header(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: BodyStream) -> Self {
        self.body = Body::Stream(stream);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub(crate) fn append_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
    }

    pub(crate) fn set_request_id(&mut self, id: RequestId) {
        self.request_id = id;
    }

    pub(crate) fn set_match(&mut self, m: RouteMatch) {
        self.route = Some(m.route);
        self.params = m.params;
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as received, query string included.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Path component of the target (not percent-decoded).
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(p, _)| p)
    }

    /// Raw query string without the leading `?`, empty if absent.
    #[must_use]
    pub fn query_string(&self) -> &str {
        self.target.split_once('?').map_or("", |(_, q)| q)
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The matched route, once routing has happened.
    #[must_use]
    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    #[must_use]
    pub fn params(&self) -> &ParamVec {
        &self.params
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderVec {
        &self.headers
    }

    /// First value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a header in arrival order.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared content type, defaulting to `application/octet-stream`.
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.header("content-type")
            .unwrap_or("application/octet-stream")
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// Credential from `Authorization: Token <t>` or `Authorization: Bearer <t>`; any
    /// other scheme yields the whole header value.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        let auth = self.header("authorization")?.trim();
        match auth.split_once(' ') {
            Some((scheme, token))
                if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") =>
            {
                Some(token.trim())
            }
            _ => Some(auth),
        }
    }

    /// Decoded query pairs in order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Every value of a query parameter.
    #[must_use]
    pub fn query_all(&self, name: &str) -> Vec<String> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    /// Cookies from every `Cookie` header.
    #[must_use]
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.header_all("cookie")
            .flat_map(|c| c.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=').unwrap_or((pair.trim(), ""));
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Whether the body is still an unread stream.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// The full body.
    ///
    /// A buffered body can be read any number of times. A streaming body is read at most
    /// once: this call drains it, and any later `body()` or `take_stream()` fails with
    /// `BodyAlreadyConsumed`.
    pub fn body(&mut self) -> Result<&Bytes, Error> {
        match std::mem::replace(&mut self.body, Body::Consumed) {
            Body::Stream(stream) => self.body = Body::Drained(stream.collect_bytes()?),
            Body::Full(bytes) => self.body = Body::Full(bytes),
            Body::Drained(_) | Body::Consumed => return Err(already_consumed()),
        }
        match &self.body {
            Body::Full(bytes) | Body::Drained(bytes) => Ok(bytes),
            _ => Err(already_consumed()),
        }
    }

    /// Take the body as a chunk stream. Buffered bodies can be streamed any number of
    /// times; a real stream only once.
    pub fn take_stream(&mut self) -> Result<BodyStream, Error> {
        match std::mem::replace(&mut self.body, Body::Consumed) {
            Body::Stream(stream) => Ok(stream),
            Body::Full(bytes) => {
                let (tx, stream) = body_channel();
                if !bytes.is_empty() {
                    tx.send(bytes.clone());
                }
                self.body = Body::Full(bytes);
                Ok(stream)
            }
            Body::Drained(_) | Body::Consumed => Err(already_consumed()),
        }
    }

    /// Body as UTF-8 text.
    pub fn text(&mut self) -> Result<String, Error> {
        let bytes = self.body()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::invalid_usage("request body is not valid UTF-8").with_source(e))
    }

    /// Body decoded as JSON. Malformed input is `InvalidUsage`.
    pub fn json<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let bytes = self.body()?;
        serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_usage("Failed when parsing body as json").with_source(e))
    }

    /// Body decoded as a form.
    ///
    /// `multipart/form-data` bodies are split on the boundary from `Content-Type`; any other
    /// body is read as `application/x-www-form-urlencoded`, which never has files.
    pub fn form_data(&mut self) -> Result<FormData, Error> {
        let (mime, params) = split_params(self.content_type());
        if mime.eq_ignore_ascii_case("multipart/form-data") {
            let boundary = params
                .into_iter()
                .find_map(|(k, v)| (k == "boundary").then_some(v))
                .ok_or_else(|| Error::invalid_usage("multipart body without a boundary"))?;
            return parse_multipart(self.body()?, &boundary);
        }
        let bytes = self.body()?;
        Ok(FormData {
            fields: url::form_urlencoded::parse(bytes)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            files: Vec::new(),
        })
    }

    /// Text fields of a form body, see [`form_data`](Self::form_data).
    pub fn form(&mut self) -> Result<Vec<(String, String)>, Error> {
        Ok(self.form_data()?.fields)
    }

    /// Files of a `multipart/form-data` body; empty for other bodies.
    pub fn files(&mut self) -> Result<Vec<UploadedFile>, Error> {
        Ok(self.form_data()?.files)
    }

    /// Per-request state shared between middleware and handlers.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("request_id", &self.request_id)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

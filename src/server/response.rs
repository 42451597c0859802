//! Outbound response model.
//!
//! Construction is validated: the status must lie in 100–599, header names must be HTTP
//! tokens, header values may not contain control characters (other than tab) and the body
//! may only be set once. Violations are contract errors, not client errors.

use bytes::Bytes;
use http::{HeaderName, StatusCode};
use serde::Serialize;
use std::fmt;

use super::cookie::Cookie;
use crate::error::{Error, ErrorKind};

/// Lazy sequence of body chunks sent with chunked transfer coding.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Bytes, Error>> + Send>;

/// Where the response body comes from.
pub enum ResponseBody {
    Empty,
    Full(Bytes),
    Stream(ChunkStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Full(b) => write!(f, "Full({} bytes)", b.len()),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// An HTTP response produced by a handler, middleware or the error handler.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: ResponseBody,
    body_set: bool,
}

fn check_status(status: u16) -> Result<u16, Error> {
    if (100..=599).contains(&status) {
        Ok(status)
    } else {
        Err(Error::new(
            ErrorKind::InvalidStatus,
            format!("status {status} is outside 100-599"),
        ))
    }
}

fn check_header(name: &str, value: &str) -> Result<(), Error> {
    if HeaderName::from_bytes(name.as_bytes()).is_err() {
        return Err(Error::new(
            ErrorKind::InvalidHeader,
            format!("invalid header name `{}`", name.escape_debug()),
        ));
    }
    if value.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
        return Err(Error::new(
            ErrorKind::InvalidHeader,
            format!("header `{name}` has a control character in its value"),
        ));
    }
    Ok(())
}

impl Response {
    /// Empty response with the given status and no body yet.
    pub fn new(status: u16) -> Result<Self, Error> {
        Ok(Self {
            status: check_status(status)?,
            headers: Vec::new(),
            body: ResponseBody::Empty,
            body_set: false,
        })
    }

    fn with_body_unchecked(status: u16, content_type: &str, body: Bytes) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: ResponseBody::Full(body),
            body_set: true,
        }
    }

    /// Plain-text response for a status the framework itself produces.
    pub(crate) fn plain(status: u16, body: impl Into<String>) -> Self {
        Self::with_body_unchecked(status, "text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    /// `200 text/plain`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_body_unchecked(200, "text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    /// `200 text/html`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::with_body_unchecked(200, "text/html; charset=utf-8", Bytes::from(body.into()))
    }

    /// `200 application/json` from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value).map_err(|e| {
            Error::server_error("failed to serialize response body").with_source(e)
        })?;
        Ok(Self::with_body_unchecked(200, "application/json", Bytes::from(body)))
    }

    /// `200` with raw bytes and an explicit content type.
    pub fn raw(body: impl Into<Bytes>, content_type: &str) -> Result<Self, Error> {
        check_header("Content-Type", content_type)?;
        Ok(Self::with_body_unchecked(200, content_type, body.into()))
    }

    /// `302 Found` pointing at `location`.
    pub fn redirect(location: &str) -> Result<Self, Error> {
        let mut res = Self::new(302)?;
        res.set_header("Location", location)?;
        res.set_body(Bytes::new())?;
        Ok(res)
    }

    /// `204 No Content`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: 204,
            headers: Vec::new(),
            body: ResponseBody::Empty,
            body_set: true,
        }
    }

    /// `200` with a body produced chunk by chunk.
    pub fn stream<I>(chunks: I, content_type: &str) -> Result<Self, Error>
    where
        I: Iterator<Item = Result<Bytes, Error>> + Send + 'static,
    {
        check_header("Content-Type", content_type)?;
        Ok(Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: ResponseBody::Stream(Box::new(chunks)),
            body_set: true,
        })
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Canonical reason phrase for the status.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status)
    }

    pub fn set_status(&mut self, status: u16) -> Result<(), Error> {
        self.status = check_status(status)?;
        Ok(())
    }

    /// Builder form of [`set_status`](Self::set_status).
    pub fn with_status(mut self, status: u16) -> Result<Self, Error> {
        self.set_status(status)?;
        Ok(self)
    }

    /// First value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Replace every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), Error> {
        let value = value.into();
        check_header(name, &value)?;
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
        Ok(())
    }

    /// Add a value for `name`, keeping existing ones.
    pub fn append_header(&mut self, name: &str, value: impl Into<String>) -> Result<(), Error> {
        let value = value.into();
        check_header(name, &value)?;
        self.headers.push((name.to_string(), value));
        Ok(())
    }

    /// Builder form of [`set_header`](Self::set_header).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Result<Self, Error> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Send a cookie scoped to `Path=/`. See [`Cookie::new`] for what is rejected.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.add_cookie(Cookie::new(name, value)?)
    }

    /// Send `cookie`, replacing a cookie of the same name set earlier on this response.
    pub fn add_cookie(&mut self, cookie: Cookie) -> Result<(), Error> {
        self.drop_cookie_header(cookie.name());
        self.append_header("Set-Cookie", cookie.to_string())
    }

    /// Forget a cookie set on this response, or, if there is none, tell the client to
    /// drop its copy.
    pub fn delete_cookie(&mut self, name: &str) -> Result<(), Error> {
        if self.drop_cookie_header(name) {
            return Ok(());
        }
        self.add_cookie(Cookie::removal(name)?)
    }

    /// Remove the `Set-Cookie` header for `name`. Returns whether there was one.
    fn drop_cookie_header(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(k, v)| {
            !(k.eq_ignore_ascii_case("set-cookie")
                && v.split_once('=').is_some_and(|(n, _)| n == name))
        });
        self.headers.len() != before
    }

    /// Set a buffered body. Fails with `BodyAlreadySet` on the second call.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> Result<(), Error> {
        self.claim_body()?;
        self.body = ResponseBody::Full(body.into());
        Ok(())
    }

    /// Set a streamed body. Fails with `BodyAlreadySet` on the second call.
    pub fn set_stream(&mut self, chunks: ChunkStream) -> Result<(), Error> {
        self.claim_body()?;
        self.body = ResponseBody::Stream(chunks);
        Ok(())
    }

    fn claim_body(&mut self) -> Result<(), Error> {
        if self.body_set {
            return Err(Error::new(
                ErrorKind::BodyAlreadySet,
                "response body was already set",
            ));
        }
        self.body_set = true;
        Ok(())
    }

    #[must_use]
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Buffered body bytes, if the body is not streamed.
    #[must_use]
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Full(b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Empty)
    }
}

/// Reason phrase for a status code, `Unknown` when it has none.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

//! # Error Module
//!
//! A single [`Error`] type flows through the whole request pipeline. Every error carries an
//! [`ErrorKind`] tag, and kinds form a small hierarchy through [`ErrorKind::parent`] so that
//! the [`ErrorHandler`](crate::error_handler::ErrorHandler) can pick the most specific
//! registered handler by walking the ancestor chain.
//!
//! ```text
//! Http ─┬─ NotFound            (404)
//!       ├─ MethodNotAllowed    (405, carries the allowed methods)
//!       ├─ InvalidUsage        (400)
//!       ├─ RequestTimeout      (408)
//!       ├─ PayloadTooLarge     (413)
//!       └─ ServerError         (500)
//!
//! Contract ─┬─ InvalidHeader
//!           ├─ InvalidStatus
//!           ├─ BodyAlreadyConsumed
//!           └─ BodyAlreadySet
//!
//! InvalidRoute, RouteConflict, UrlBuild   (setup time)
//! HandlerPanic                 (panic caught at the dispatch boundary)
//! Internal                     (io/anyhow failures bubbled up with `?`)
//! Custom(name)                 (parent declared on the error handler)
//! ```
//!
//! Transport failures (timeouts, resets) are never represented here; the protocol keeps
//! them as `std::io::Error` and closes the connection.

use http::Method;
use std::borrow::Cow;
use std::fmt;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type Source = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tag identifying what went wrong, arranged in a parent/child hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Abstract parent of every error that maps directly onto an HTTP status.
    Http,
    /// No route matches the path for any method.
    NotFound,
    /// The path matches, but not for the requested method.
    MethodNotAllowed,
    /// The client sent something the handler cannot use (400).
    InvalidUsage,
    /// The request was not received in time (408).
    RequestTimeout,
    /// The request exceeded the configured size limit (413).
    PayloadTooLarge,
    /// Explicit server-side failure raised by application code (500).
    ServerError,
    /// Abstract parent of programming-contract violations.
    Contract,
    /// A header name or value that cannot be put on the wire.
    InvalidHeader,
    /// A status code outside 100–599.
    InvalidStatus,
    /// A streaming request body was read twice.
    BodyAlreadyConsumed,
    /// A response body was set twice.
    BodyAlreadySet,
    /// A route pattern that cannot be parsed.
    InvalidRoute,
    /// A route registration that could never be reached.
    RouteConflict,
    /// `url_for` could not build a path.
    UrlBuild,
    /// A handler, middleware or error handler panicked.
    HandlerPanic,
    /// An unexpected failure converted from `std::io::Error` or `anyhow::Error`.
    /// Its message stays in the logs unless debug output is enabled.
    Internal,
    /// Application-defined kind. Its parent is declared on the error handler.
    Custom(Cow<'static, str>),
}

impl ErrorKind {
    /// Built-in parent of this kind, if any.
    ///
    /// Custom kinds return `None` here; their parents live in the
    /// [`ErrorHandler`](crate::error_handler::ErrorHandler) table.
    #[must_use]
    pub fn parent(&self) -> Option<ErrorKind> {
        match self {
            ErrorKind::NotFound
            | ErrorKind::MethodNotAllowed
            | ErrorKind::InvalidUsage
            | ErrorKind::RequestTimeout
            | ErrorKind::PayloadTooLarge
            | ErrorKind::ServerError => Some(ErrorKind::Http),
            ErrorKind::InvalidHeader
            | ErrorKind::InvalidStatus
            | ErrorKind::BodyAlreadyConsumed
            | ErrorKind::BodyAlreadySet => Some(ErrorKind::Contract),
            _ => None,
        }
    }

    /// Status code a response for this kind carries by default.
    #[must_use]
    pub fn default_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::InvalidUsage => 400,
            ErrorKind::RequestTimeout => 408,
            ErrorKind::PayloadTooLarge => 413,
            _ => 500,
        }
    }

    /// Whether the message of this kind is safe to show to clients.
    #[must_use]
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound
                | ErrorKind::MethodNotAllowed
                | ErrorKind::InvalidUsage
                | ErrorKind::RequestTimeout
                | ErrorKind::PayloadTooLarge
                | ErrorKind::ServerError
        )
    }

    /// Stable name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Http => "Http",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::InvalidUsage => "InvalidUsage",
            ErrorKind::RequestTimeout => "RequestTimeout",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::Contract => "Contract",
            ErrorKind::InvalidHeader => "InvalidHeader",
            ErrorKind::InvalidStatus => "InvalidStatus",
            ErrorKind::BodyAlreadyConsumed => "BodyAlreadyConsumed",
            ErrorKind::BodyAlreadySet => "BodyAlreadySet",
            ErrorKind::InvalidRoute => "InvalidRoute",
            ErrorKind::RouteConflict => "RouteConflict",
            ErrorKind::UrlBuild => "UrlBuild",
            ErrorKind::HandlerPanic => "HandlerPanic",
            ErrorKind::Internal => "Internal",
            ErrorKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error raised anywhere in routing, dispatch or response construction.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    status: Option<u16>,
    allowed: Vec<Method>,
    source: Option<Source>,
}

impl Error {
    /// Create an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            allowed: Vec::new(),
            source: None,
        }
    }

    /// `NotFound` for the given path.
    pub fn not_found(path: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("Requested URL {path} not found"))
    }

    /// `MethodNotAllowed` carrying the methods the path does accept.
    pub fn method_not_allowed(method: &Method, path: &str, allowed: Vec<Method>) -> Self {
        let mut err = Self::new(
            ErrorKind::MethodNotAllowed,
            format!("Method {method} not allowed for URL {path}"),
        );
        err.allowed = allowed;
        err
    }

    /// `InvalidUsage` (400).
    pub fn invalid_usage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidUsage, message)
    }

    /// `ServerError` (500).
    pub fn server_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    /// An application-defined error kind.
    pub fn custom(name: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Custom(name.into()), message)
    }

    /// Override the status the default error handler answers with.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Source>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Status for the response produced from this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status.unwrap_or_else(|| self.kind.default_status())
    }

    /// Methods allowed for the path (only populated for `MethodNotAllowed`).
    #[must_use]
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed
    }

    /// True if this error's kind is `kind` or descends from it through built-in parents.
    #[must_use]
    pub fn is(&self, kind: &ErrorKind) -> bool {
        let mut current = Some(self.kind.clone());
        while let Some(k) = current {
            if &k == kind {
                return true;
            }
            current = k.parent();
        }
        false
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::new(ErrorKind::Internal, err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Internal, err.to_string()).with_source(err)
    }
}

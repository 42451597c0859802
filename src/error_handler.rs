//! Maps pipeline errors to responses.
//!
//! Handlers are registered per [`ErrorKind`]. Lookup walks from the error's own kind up
//! through its ancestors and picks the first kind that has a handler, so a handler for
//! `Http` catches every HTTP error that has no more specific handler. Among handlers for
//! the same kind, the first registered wins.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{Error, ErrorKind};
use crate::router::join_methods;
use crate::server::{Request, Response};

/// Produces a response for an error. May itself fail.
pub type ErrorHandlerFn = Arc<dyn Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync>;

const GENERIC_500: &str =
    "Internal Server Error\n\nThe server encountered an internal error and cannot complete your request.";

/// Guards against parent declarations that form a cycle.
const MAX_KIND_DEPTH: usize = 32;

#[derive(Default, Clone)]
pub struct ErrorHandler {
    handlers: Vec<(ErrorKind, ErrorHandlerFn)>,
    parents: HashMap<Cow<'static, str>, ErrorKind>,
    debug: bool,
}

impl ErrorHandler {
    #[must_use]
    pub fn new(debug: bool) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Register `handler` for `kind` and all its descendants.
    pub fn register(&mut self, kind: ErrorKind, handler: ErrorHandlerFn) {
        self.handlers.push((kind, handler));
    }

    /// Declare the parent of a custom error kind.
    pub fn declare(&mut self, custom: impl Into<Cow<'static, str>>, parent: ErrorKind) {
        self.parents.insert(custom.into(), parent);
    }

    fn parent_of(&self, kind: &ErrorKind) -> Option<ErrorKind> {
        match kind {
            ErrorKind::Custom(name) => self.parents.get(name).cloned(),
            builtin => builtin.parent(),
        }
    }

    /// `kind` followed by its ancestors, most specific first.
    #[must_use]
    pub fn lineage(&self, kind: &ErrorKind) -> Vec<ErrorKind> {
        let mut chain = vec![kind.clone()];
        while chain.len() < MAX_KIND_DEPTH {
            let Some(parent) = chain.last().and_then(|k| self.parent_of(k)) else {
                break;
            };
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
        }
        chain
    }

    fn lookup(&self, kind: &ErrorKind) -> Option<&ErrorHandlerFn> {
        self.lineage(kind).iter().find_map(|k| {
            self.handlers
                .iter()
                .find(|(registered, _)| registered == k)
                .map(|(_, h)| h)
        })
    }

    /// Produce the response for `err`, using a registered handler when one matches.
    pub fn response(&self, req: &Request, err: &Error) -> Result<Response, Error> {
        match self.lookup(err.kind()) {
            Some(handler) => handler(req, err),
            None => Ok(self.default_response(err)),
        }
    }

    /// Built-in response: HTTP errors keep their status and message, everything else
    /// becomes a generic 500.
    #[must_use]
    pub fn default_response(&self, err: &Error) -> Response {
        let lineage = self.lineage(err.kind());
        if lineage.contains(&ErrorKind::Http) {
            let status = err.status();
            debug!(status, kind = %err.kind(), error = %err, "HTTP error response");
            let mut res = Response::plain(status, format!("Error: {}", err.message()));
            if !err.allowed_methods().is_empty() {
                let allow = join_methods(err.allowed_methods()).replace(',', ", ");
                if let Err(e) = res.set_header("Allow", allow) {
                    error!(error = %e, "Failed to set Allow header");
                }
            }
            return res;
        }

        error!(kind = %err.kind(), error = %err, "Unhandled error in request pipeline");
        if self.debug {
            let mut body = format!("Error: {}: {}", err.kind(), err);
            let mut source = std::error::Error::source(err);
            while let Some(cause) = source {
                body.push_str(&format!("\ncaused by: {cause}"));
                source = cause.source();
            }
            Response::plain(500, body)
        } else {
            Response::plain(500, GENERIC_500)
        }
    }
}

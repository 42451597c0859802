use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{Error, ErrorKind};
use crate::error_handler::ErrorHandler;
use crate::middleware::MiddlewareStack;
use crate::router::Router;
use crate::server::{Request, Response};
use crate::signals::{panic_message, ConnectionInfo, Signal, SignalEvent, Signals};

/// A request handler. Runs synchronously inside the connection coroutine; blocking I/O
/// through `may` primitives suspends the coroutine, not the worker thread.
pub type Handler = Arc<dyn Fn(&mut Request) -> Result<Response, Error> + Send + Sync>;

const DOUBLE_FAULT_BODY: &str = "An error occurred while handling an error";

/// Runs one request through signals, middleware, routing, the handler and the error
/// handler. Holds only frozen state and is shared by every connection.
pub struct Dispatcher {
    router: Router,
    middlewares: MiddlewareStack,
    signals: Signals,
    error_handler: ErrorHandler,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        router: Router,
        middlewares: MiddlewareStack,
        signals: Signals,
        error_handler: ErrorHandler,
    ) -> Self {
        Self {
            router,
            middlewares,
            signals,
            error_handler,
        }
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    #[must_use]
    pub fn middlewares(&self) -> &MiddlewareStack {
        &self.middlewares
    }

    #[must_use]
    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    /// Resolve the route ahead of the body so the protocol knows whether to stream it.
    ///
    /// The outcome is kept on the request and reused by [`dispatch`](Self::dispatch);
    /// a lookup failure is reported later, after the before-request middleware.
    pub(crate) fn prepare(&self, req: &mut Request) -> bool {
        let resolution = self.router.resolve_on(req.method(), req.host(), req.path());
        let stream = matches!(&resolution, Ok(m) if m.route.is_stream());
        req.resolution = Some(resolution);
        stream
    }

    /// Produce the response for `req`. Never fails: every error and panic ends up as a
    /// response from the error handler or, if that fails too, a minimal 500.
    pub fn dispatch(&self, req: &mut Request, conn: Option<&ConnectionInfo>) -> Response {
        let start = Instant::now();
        self.fire(SignalEvent::new(Signal::RequestReceived).request(req), conn);

        let mut res = match catch_unwind(AssertUnwindSafe(|| self.run(req))) {
            Ok(Ok(res)) => res,
            Ok(Err(err)) => self.handle_error(req, &err, conn),
            Err(panic) => {
                let err = Error::new(ErrorKind::HandlerPanic, panic_message(panic.as_ref()));
                error!(
                    request_id = %req.request_id(),
                    method = %req.method(),
                    path = %req.path(),
                    panic_message = %err.message(),
                    "Handler panicked"
                );
                self.handle_error(req, &err, conn)
            }
        };

        let latency = start.elapsed();
        for (idx, mw) in self.middlewares.after().iter().enumerate().rev() {
            let err = match catch_unwind(AssertUnwindSafe(|| mw.after(req, &mut res, latency))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => Error::new(ErrorKind::HandlerPanic, panic_message(panic.as_ref())),
            };
            warn!(
                request_id = %req.request_id(),
                middleware_idx = idx,
                error = %err,
                "After-response middleware failed, remaining hooks skipped"
            );
            res = self.handle_error(req, &err, conn);
            break;
        }

        debug!(
            request_id = %req.request_id(),
            method = %req.method(),
            path = %req.path(),
            status = res.status(),
            duration_us = start.elapsed().as_micros() as u64,
            "Request dispatched"
        );
        res
    }

    fn run(&self, req: &mut Request) -> Result<Response, Error> {
        for (idx, mw) in self.middlewares.before().iter().enumerate() {
            if let Some(res) = mw.before(req)? {
                debug!(
                    request_id = %req.request_id(),
                    middleware_idx = idx,
                    status = res.status(),
                    "Middleware returned early response"
                );
                return Ok(res);
            }
        }

        let matched = match req.resolution.take() {
            Some(resolution) => resolution?,
            None => self.router.resolve_on(req.method(), req.host(), req.path())?,
        };
        let handler = Arc::clone(matched.route.handler());
        req.set_match(matched);
        handler(req)
    }

    /// Turn `err` into a response, firing `PipelineError` first.
    pub fn handle_error(&self, req: &Request, err: &Error, conn: Option<&ConnectionInfo>) -> Response {
        self.fire(
            SignalEvent::new(Signal::PipelineError).request(req).error(err),
            conn,
        );

        let second = match catch_unwind(AssertUnwindSafe(|| self.error_handler.response(req, err))) {
            Ok(Ok(res)) => return res,
            Ok(Err(second)) => second.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        error!(
            request_id = %req.request_id(),
            error = %err,
            handler_error = %second,
            "Error handler failed while handling an error"
        );
        Response::plain(500, DOUBLE_FAULT_BODY)
    }

    fn fire<'a>(&self, event: SignalEvent<'a>, conn: Option<&'a ConnectionInfo>) {
        let event = match conn {
            Some(c) => event.connection(c),
            None => event,
        };
        self.signals.fire(&event);
    }
}

use std::time::Duration;

use tracing::{field, info, info_span, warn, Span};

use super::Middleware;
use crate::error::Error;
use crate::ids::REQUEST_ID_HEADER;
use crate::server::{Request, Response};

/// Opens a `request` span per request and records status and latency on it.
///
/// Register for both directions. The span travels in the request extensions, so it
/// survives the coroutine hopping between worker threads.
pub struct TracingMiddleware;

#[derive(Clone)]
struct RequestSpan(Span);

impl Middleware for TracingMiddleware {
    fn before(&self, req: &mut Request) -> Result<Option<Response>, Error> {
        let span = info_span!(
            "request",
            request_id = %req.request_id(),
            method = %req.method(),
            path = %req.path(),
            status = field::Empty,
            latency_ms = field::Empty,
        );
        req.extensions_mut().insert(RequestSpan(span));
        Ok(None)
    }

    fn after(&self, req: &Request, res: &mut Response, latency: Duration) -> Result<(), Error> {
        res.set_header(REQUEST_ID_HEADER, req.request_id().to_string())?;

        let Some(RequestSpan(span)) = req.extensions().get::<RequestSpan>() else {
            return Ok(());
        };
        let latency_ms = latency.as_millis() as u64;
        span.record("status", res.status());
        span.record("latency_ms", latency_ms);
        span.in_scope(|| {
            if res.status() >= 500 {
                warn!(status = res.status(), latency_ms, "Request completed with server error");
            } else {
                info!(status = res.status(), latency_ms, "Request completed");
            }
        });
        Ok(())
    }
}

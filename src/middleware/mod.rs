//! Before-request and after-response hooks around the handler.

mod core;
mod metrics;
mod tracing;

pub use core::{on_request, on_response, Direction, Middleware, MiddlewareStack};
pub use metrics::{MetricsMiddleware, MetricsSnapshot};
pub use tracing::TracingMiddleware;

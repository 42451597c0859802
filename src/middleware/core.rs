use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::server::{Request, Response};

/// Hook into the request pipeline.
///
/// `before` runs ahead of routing and the handler, in registration order. Returning
/// `Ok(Some(response))` short-circuits: the handler and the remaining `before` hooks are
/// skipped, but `after` hooks still run.
///
/// `after` runs once a response exists, in reverse registration order, including for
/// responses produced by the error handler. It may mutate the response or replace it
/// wholesale through the `&mut` reference.
///
/// Errors from either hook are handed to the error handler like handler errors.
pub trait Middleware: Send + Sync {
    fn before(&self, _req: &mut Request) -> Result<Option<Response>, Error> {
        Ok(None)
    }

    fn after(&self, _req: &Request, _res: &mut Response, _latency: Duration) -> Result<(), Error> {
        Ok(())
    }
}

/// Which side of the handler a middleware is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

struct RequestFn<F>(F);

impl<F> Middleware for RequestFn<F>
where
    F: Fn(&mut Request) -> Result<Option<Response>, Error> + Send + Sync,
{
    fn before(&self, req: &mut Request) -> Result<Option<Response>, Error> {
        (self.0)(req)
    }
}

struct ResponseFn<F>(F);

impl<F> Middleware for ResponseFn<F>
where
    F: Fn(&Request, &mut Response) -> Result<(), Error> + Send + Sync,
{
    fn after(&self, req: &Request, res: &mut Response, _latency: Duration) -> Result<(), Error> {
        (self.0)(req, res)
    }
}

/// Wrap a closure as a before-request middleware.
pub fn on_request<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut Request) -> Result<Option<Response>, Error> + Send + Sync + 'static,
{
    Arc::new(RequestFn(f))
}

/// Wrap a closure as an after-response middleware.
pub fn on_response<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&Request, &mut Response) -> Result<(), Error> + Send + Sync + 'static,
{
    Arc::new(ResponseFn(f))
}

/// Ordered middleware lists, one per direction.
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    before: Vec<Arc<dyn Middleware>>,
    after: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn add(&mut self, direction: Direction, mw: Arc<dyn Middleware>) {
        match direction {
            Direction::Request => self.before.push(mw),
            Direction::Response => self.after.push(mw),
        }
    }

    /// Before-request hooks in registration order.
    #[must_use]
    pub fn before(&self) -> &[Arc<dyn Middleware>] {
        &self.before
    }

    /// After-response hooks in registration order; the dispatcher runs them reversed.
    #[must_use]
    pub fn after(&self) -> &[Arc<dyn Middleware>] {
        &self.after
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.before.len() + self.after.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

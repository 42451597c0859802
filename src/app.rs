//! Two-phase application lifecycle.
//!
//! An [`AppBuilder`] collects routes, middleware, signal subscribers and error handlers.
//! [`AppBuilder::build`] validates everything and freezes it into an [`App`] that is
//! shared read-only by every connection.
//!
//! ```rust,no_run
//! use machwire::{App, Response};
//!
//! let app = App::builder()
//!     .get("/hello/{name:alpha}", |req| {
//!         let name = req.param("name").map(ToString::to_string).unwrap_or_default();
//!         Ok(Response::text(format!("hello {name}")))
//!     })
//!     .build()
//!     .expect("valid routes");
//! let server = app.serve("127.0.0.1:8080").expect("bind");
//! server.join().ok();
//! ```

use http::Method;
use std::borrow::Cow;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, ErrorKind};
use crate::error_handler::ErrorHandler;
use crate::middleware::{self, Direction, Middleware, MiddlewareStack};
use crate::router::{RouteOptions, Router};
use crate::server::{HttpServer, Request, Response, ServerHandle};
use crate::signals::{Signal, SignalEvent, Signals};

/// Mutable setup phase.
#[derive(Default)]
pub struct AppBuilder {
    router: Router,
    middlewares: MiddlewareStack,
    signals: Signals,
    error_handler: ErrorHandler,
    config: ServerConfig,
    errors: Vec<Error>,
}

impl AppBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a route. Registration errors are reported by [`build`](Self::build).
    #[must_use]
    pub fn route<F>(mut self, methods: &[Method], pattern: &str, options: RouteOptions, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        if let Err(e) = self
            .router
            .register(methods, pattern, Arc::new(handler), options)
        {
            self.errors.push(e);
        }
        self
    }

    #[must_use]
    pub fn get<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::GET], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn post<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::POST], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn put<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::PUT], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn delete<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::DELETE], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn patch<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::PATCH], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn head<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::HEAD], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn options<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.route(&[Method::OPTIONS], pattern, RouteOptions::default(), handler)
    }

    #[must_use]
    pub fn add_middleware(mut self, direction: Direction, mw: Arc<dyn Middleware>) -> Self {
        self.middlewares.add(direction, mw);
        self
    }

    /// Register `mw` as both a before-request and an after-response middleware.
    #[must_use]
    pub fn wrap(self, mw: Arc<dyn Middleware>) -> Self {
        self.add_middleware(Direction::Request, Arc::clone(&mw))
            .add_middleware(Direction::Response, mw)
    }

    #[must_use]
    pub fn on_request<F>(self, f: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Option<Response>, Error> + Send + Sync + 'static,
    {
        self.add_middleware(Direction::Request, middleware::on_request(f))
    }

    #[must_use]
    pub fn on_response<F>(self, f: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.add_middleware(Direction::Response, middleware::on_response(f))
    }

    #[must_use]
    pub fn subscribe<F>(mut self, signal: Signal, f: F) -> Self
    where
        F: Fn(&SignalEvent<'_>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.signals.subscribe(signal, Arc::new(f));
        self
    }

    /// Handle errors of `kind` and its descendants.
    #[must_use]
    pub fn error_handler<F>(mut self, kind: ErrorKind, f: F) -> Self
    where
        F: Fn(&Request, &Error) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.error_handler.register(kind, Arc::new(f));
        self
    }

    /// Place a custom error kind under `parent` for handler lookup.
    #[must_use]
    pub fn declare_error(mut self, name: impl Into<Cow<'static, str>>, parent: ErrorKind) -> Self {
        self.error_handler.declare(name, parent);
        self
    }

    /// Freeze the configuration. Fails with the first registration error.
    pub fn build(self) -> Result<Arc<App>, Error> {
        let AppBuilder {
            router,
            middlewares,
            signals,
            mut error_handler,
            config,
            errors,
        } = self;

        for e in &errors {
            error!(error = %e, kind = %e.kind(), "Route registration failed");
        }
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }

        error_handler.set_debug(config.debug);
        router.log_summary();
        info!(
            routes = router.routes().len(),
            middlewares = middlewares.len(),
            "Application built"
        );
        Ok(Arc::new(App {
            dispatcher: Arc::new(Dispatcher::new(router, middlewares, signals, error_handler)),
            config,
        }))
    }
}

/// Frozen application: everything a connection needs, shared read-only.
pub struct App {
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
}

impl App {
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        self.dispatcher.router()
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build a URL for a named route.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        self.router().url_for(name, params)
    }

    /// Run one request through the pipeline without a connection.
    pub fn handle(&self, req: &mut Request) -> Response {
        self.dispatcher.dispatch(req, None)
    }

    /// Bind `addr` and serve until the returned handle is stopped.
    pub fn serve<A: ToSocketAddrs>(&self, addr: A) -> io::Result<ServerHandle> {
        HttpServer::new(Arc::clone(&self.dispatcher), self.config.http.clone()).start(addr)
    }
}

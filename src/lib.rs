//! # machwire
//!
//! **machwire** is the routing and dispatch core of a coroutine-powered HTTP/1.1 web
//! framework built on the `may` runtime.
//!
//! ## Architecture
//!
//! - **[`router`]** - Segment trie with typed parameters, greedy tails and conflict detection
//! - **[`server`]** - Request/response model, wire codec, connection protocol and accept loop
//! - **[`middleware`]** - Before-request and after-response hooks (tracing, metrics)
//! - **[`signals`]** - Lifecycle events with fire-and-continue subscribers
//! - **[`error_handler`]** - Error kind to response mapping
//! - **[`dispatcher`]** - The per-request pipeline tying the above together
//! - **[`app`]** - Two-phase setup: mutable [`AppBuilder`], frozen [`App`]
//! - **[`config`]** / **[`logging`]** - YAML + environment configuration, `tracing` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as HttpServer<br/>(accept loop)
//!     participant Protocol as Protocol<br/>(connection coroutine)
//!     participant Dispatcher
//!     participant Middleware as Middleware Chain
//!     participant Router
//!     participant Handler
//!     participant Errors as Error Handler
//!
//!     Client->>Server: TCP connect
//!     Server->>Protocol: spawn coroutine
//!     Client->>Protocol: GET /users/42
//!     Protocol->>Protocol: parse head, read body
//!     Protocol->>Dispatcher: dispatch(request)
//!     Dispatcher->>Middleware: before (registration order)
//!     alt short-circuit
//!         Middleware-->>Dispatcher: Some(response)
//!     else continue
//!         Dispatcher->>Router: resolve(GET, /users/42)
//!         Router-->>Dispatcher: route + {id: 42}
//!         Dispatcher->>Handler: handler(&mut request)
//!         alt error or panic
//!             Dispatcher->>Errors: response for error
//!         end
//!     end
//!     Dispatcher->>Middleware: after (reverse order)
//!     Dispatcher-->>Protocol: response
//!     Protocol-->>Client: HTTP/1.1 200 OK
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use machwire::{App, Response};
//!
//! let app = App::builder()
//!     .get("/users/{id:int}", |req| {
//!         let id = req.param("id").and_then(|v| v.as_i64()).unwrap_or_default();
//!         Ok(Response::text(format!("user {id}")))
//!     })
//!     .build()
//!     .expect("routes are valid");
//! let server = app.serve("0.0.0.0:8080").expect("bind");
//! server.stop();
//! ```
//!
//! ## Runtime Considerations
//!
//! machwire uses the `may` coroutine runtime, not tokio or async-std. This means:
//!
//! - Every connection runs in its own coroutine; handlers run synchronously inside it
//! - Worker threads and stack size come from `runtime.workers` / `runtime.stack_size`
//!   (or `MACHWIRE_WORKERS` / `MACHWIRE_STACK_SIZE`)
//! - Blocking operations should use `may`'s blocking facilities

pub mod app;
pub mod cli;
pub mod config;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod signals;

pub use app::{App, AppBuilder};
pub use config::ServerConfig;
pub use error::{Error, ErrorKind, Result};
pub use middleware::{Direction, Middleware};
pub use router::{RouteOptions, Router};
pub use server::{Cookie, Request, Response};
pub use signals::{Signal, SignalEvent};

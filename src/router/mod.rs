//! # Router Module
//!
//! Maps an HTTP method and path to a registered [`Route`] and its typed path parameters.
//!
//! ## Overview
//!
//! - [`pattern`] parses route declarations like `/users/{id:int}` into segments and
//!   parameter constraints
//! - `radix` stores routes in a segment trie and performs the backtracking lookup
//! - [`Router`] owns the trie, rejects unreachable registrations and builds URLs for
//!   named routes
//!
//! ## Example
//!
//! ```rust,ignore
//! use machwire::router::{Router, RouteOptions};
//! use machwire::server::Response;
//! use http::Method;
//! use std::sync::Arc;
//!
//! let mut router = Router::new();
//! router.register(
//!     &[Method::GET],
//!     "/users/{id:int}",
//!     Arc::new(|_req| Ok(Response::text("user"))),
//!     RouteOptions::named("user"),
//! )?;
//!
//! let m = router.resolve(&Method::GET, "/users/42")?;
//! assert_eq!(m.param("id").and_then(|v| v.as_i64()), Some(42));
//! assert_eq!(router.url_for("user", &[("id", "42")])?, "/users/42");
//! ```
//!
//! ## Matching rules
//!
//! - Literal segments beat parameters, parameters beat a greedy `path` tail
//! - Among parameters at one depth the first registered constraint is tried first
//! - A parameter that does not coerce is a non-match and lookup backtracks
//! - One trailing slash is ignored unless the route is registered with `strict_slashes`
//! - `HEAD` falls back to the `GET` route of the same path

mod core;
pub mod pattern;
mod radix;

pub use core::{ParamVec, Route, RouteMatch, RouteOptions, Router, MAX_INLINE_PARAMS};
pub(crate) use core::join_methods;
pub use pattern::{Constraint, ParamValue, Pattern, Segment};

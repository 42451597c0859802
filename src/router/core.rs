//! Router core: route registration, conflict detection and the lookup hot path.

use http::Method;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::pattern::{Constraint, ParamValue, Pattern, Segment};
use super::radix::{Lookup, RadixTree};
use crate::dispatcher::Handler;
use crate::error::{Error, ErrorKind};

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Typed path parameters of a matched route, in pattern order.
pub type ParamVec = SmallVec<[(Arc<str>, ParamValue); MAX_INLINE_PARAMS]>;

/// Per-route registration options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Distinguish `/path/` from `/path`.
    pub strict_slashes: bool,
    /// Hand the request body to the handler as a stream instead of buffering it.
    pub stream: bool,
    /// Name used by [`Router::url_for`].
    pub name: Option<String>,
    /// Only match requests whose `Host` header names this host.
    pub host: Option<String>,
}

impl RouteOptions {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict_slashes = true;
        self
    }

    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Restrict the route to one virtual host, e.g. `api.example.com` or
    /// `localhost:8080`. Compared case-insensitively.
    #[must_use]
    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().to_ascii_lowercase());
        self
    }
}

/// A registered route. Immutable once added to the router.
pub struct Route {
    pattern: Pattern,
    methods: Vec<Method>,
    handler: Handler,
    options: RouteOptions,
}

impl Route {
    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    #[must_use]
    pub fn strict_slashes(&self) -> bool {
        self.options.strict_slashes
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.options.stream
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.options.host.as_deref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Result of successfully matching a request to a route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: ParamVec,
}

impl RouteMatch {
    /// Get a path parameter by name.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v)
    }
}

/// Route table backed by a segment trie, plus one trie per virtual host.
#[derive(Default)]
pub struct Router {
    tree: RadixTree,
    hosts: HashMap<String, RadixTree>,
    routes: Vec<Arc<Route>>,
    names: HashMap<String, Arc<Route>>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `methods` on `pattern`.
    ///
    /// An empty method list means `GET`. Fails with `InvalidRoute` for a malformed
    /// pattern and with `RouteConflict` when an earlier route already captures every path
    /// this one would match for one of its methods, or when the route name is taken.
    pub fn register(
        &mut self,
        methods: &[Method],
        pattern: &str,
        handler: Handler,
        options: RouteOptions,
    ) -> Result<Arc<Route>, Error> {
        let parsed = Pattern::parse(pattern)?;

        let mut unique: Vec<Method> = Vec::with_capacity(methods.len().max(1));
        for m in methods {
            if !unique.contains(m) {
                unique.push(m.clone());
            }
        }
        if unique.is_empty() {
            unique.push(Method::GET);
        }

        if let Some(name) = &options.name {
            if self.names.contains_key(name) {
                return Err(Error::new(
                    ErrorKind::RouteConflict,
                    format!("route name `{name}` is already registered"),
                ));
            }
        }

        let route = Arc::new(Route {
            pattern: parsed,
            methods: unique,
            handler,
            options,
        });

        let tree = match route.host() {
            Some(host) => self.hosts.entry(host.to_owned()).or_default(),
            None => &mut self.tree,
        };
        let shadowed = tree.conflicts(&route);
        if !shadowed.is_empty() {
            let methods: Vec<&str> = shadowed.iter().map(Method::as_str).collect();
            warn!(
                pattern = %pattern,
                methods = ?methods,
                "Route registration rejected: unreachable"
            );
            return Err(Error::new(
                ErrorKind::RouteConflict,
                format!(
                    "route {} {pattern} is unreachable: an earlier route already matches it",
                    methods.join(",")
                ),
            ));
        }

        tree.insert(&route);
        if let Some(name) = route.name() {
            self.names.insert(name.to_owned(), Arc::clone(&route));
        }
        self.routes.push(Arc::clone(&route));

        debug!(
            pattern = %pattern,
            host = route.host().unwrap_or("*"),
            methods = ?route.methods(),
            strict_slashes = route.strict_slashes(),
            stream = route.is_stream(),
            "Route registered"
        );
        Ok(route)
    }

    /// Match `method` and `path` to a route registered without a host.
    ///
    /// Returns `NotFound` when no route matches the path for any method and
    /// `MethodNotAllowed` (with the allowed set) when the path matches other methods only.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<RouteMatch, Error> {
        self.resolve_on(method, None, path)
    }

    /// Match a request that arrived for `host`.
    ///
    /// Routes registered for that host are tried first and host-less routes second. The
    /// allowed set of a `MethodNotAllowed` covers both.
    pub fn resolve_on(
        &self,
        method: &Method,
        host: Option<&str>,
        path: &str,
    ) -> Result<RouteMatch, Error> {
        let match_start = Instant::now();
        let outcome = match self.host_tree(host) {
            Some(tree) => match tree.lookup(method, path) {
                Lookup::Found(route, captures) => Lookup::Found(route, captures),
                Lookup::Missing => self.tree.lookup(method, path),
                Lookup::WrongMethod(mut allowed) => match self.tree.lookup(method, path) {
                    Lookup::Found(route, captures) => Lookup::Found(route, captures),
                    Lookup::Missing => Lookup::WrongMethod(allowed),
                    Lookup::WrongMethod(more) => {
                        for m in more {
                            if !allowed.contains(&m) {
                                allowed.push(m);
                            }
                        }
                        Lookup::WrongMethod(allowed)
                    }
                },
            },
            None => self.tree.lookup(method, path),
        };
        let duration_us = match_start.elapsed().as_micros();

        match outcome {
            Lookup::Found(route, captures) => {
                let params: ParamVec = route
                    .pattern()
                    .param_names()
                    .cloned()
                    .zip(captures)
                    .collect();
                if duration_us > 1000 {
                    warn!(
                        method = %method,
                        path = %path,
                        route_pattern = %route.pattern(),
                        duration_us,
                        "Slow route matching detected"
                    );
                } else {
                    debug!(
                        method = %method,
                        path = %path,
                        route_pattern = %route.pattern(),
                        duration_us,
                        "Route matched"
                    );
                }
                Ok(RouteMatch { route, params })
            }
            Lookup::WrongMethod(allowed) => {
                debug!(method = %method, path = %path, allowed = ?allowed, duration_us, "Method not allowed");
                Err(Error::method_not_allowed(method, path, allowed))
            }
            Lookup::Missing => {
                debug!(method = %method, path = %path, duration_us, "No route matched");
                Err(Error::not_found(path))
            }
        }
    }

    /// Trie for the request's `Host`, trying the exact value before the port-less name.
    fn host_tree(&self, host: Option<&str>) -> Option<&RadixTree> {
        if self.hosts.is_empty() {
            return None;
        }
        let host = host?.trim().to_ascii_lowercase();
        if let Some(tree) = self.hosts.get(&host) {
            return Some(tree);
        }
        let (name, port) = host.rsplit_once(':')?;
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.hosts.get(name)
    }

    /// All registered routes in registration order.
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Log a summary of the routing table.
    pub fn log_summary(&self) {
        let summary: Vec<String> = self
            .routes
            .iter()
            .take(10)
            .map(|r| match r.host() {
                Some(host) => format!("{} {host}{}", join_methods(r.methods()), r.pattern()),
                None => format!("{} {}", join_methods(r.methods()), r.pattern()),
            })
            .collect();
        info!(
            routes_count = self.routes.len(),
            routes_summary = ?summary,
            "Routing table loaded"
        );
    }

    /// Build a path for the route registered under `name`.
    ///
    /// Every pattern parameter must be supplied and satisfy its constraint; extra
    /// parameters are appended as a query string in the order given.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        let route = self.names.get(name).ok_or_else(|| {
            Error::new(ErrorKind::UrlBuild, format!("no route named `{name}`"))
        })?;

        let mut used = vec![false; params.len()];
        let mut url = String::new();
        for segment in route.pattern().segments() {
            url.push('/');
            match segment {
                Segment::Literal(lit) => url.push_str(lit),
                Segment::Param { name: pname, constraint } => {
                    let idx = params
                        .iter()
                        .position(|(k, _)| *k == &**pname)
                        .ok_or_else(|| {
                            Error::new(
                                ErrorKind::UrlBuild,
                                format!("missing parameter `{pname}` for route `{name}`"),
                            )
                        })?;
                    used[idx] = true;
                    let value = params[idx].1;
                    let valid = match constraint {
                        Constraint::Path => {
                            value.split('/').all(|s| !s.is_empty())
                        }
                        other => other.coerce(value).is_some(),
                    };
                    if !valid {
                        return Err(Error::new(
                            ErrorKind::UrlBuild,
                            format!(
                                "value `{value}` for `{pname}` does not satisfy `{}`",
                                constraint.label()
                            ),
                        ));
                    }
                    if let Constraint::Path = constraint {
                        let encoded: Vec<_> = value.split('/').map(urlencoding::encode).collect();
                        url.push_str(&encoded.join("/"));
                    } else {
                        url.push_str(&urlencoding::encode(value));
                    }
                }
            }
        }
        if url.is_empty() || route.pattern().has_trailing_slash() {
            url.push('/');
        }

        let mut first = true;
        for ((k, v), used) in params.iter().zip(used) {
            if used {
                continue;
            }
            url.push(if first { '?' } else { '&' });
            first = false;
            url.push_str(&urlencoding::encode(k));
            url.push('=');
            url.push_str(&urlencoding::encode(v));
        }
        Ok(url)
    }
}

pub(crate) fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

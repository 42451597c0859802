//! Segment trie used for route lookup.
//!
//! Each node represents one path segment position and holds three kinds of outgoing
//! edges, tried in precedence order during lookup:
//!
//! 1. **Literal children** keyed by the exact segment text (case-sensitive)
//! 2. **Parameter edges**, one per distinct constraint, kept in registration order
//! 3. **A greedy tail** that swallows the rest of the path
//!
//! Routes live at terminal nodes, keyed by HTTP method. Lookup walks the segments
//! depth-first and backtracks when a branch fails (for example when a parameter does not
//! coerce, or the remaining segments do not match below it). The cost therefore grows
//! with the number of segments and the handful of alternatives at each depth, not with
//! the total number of routes.
//!
//! Routes registered with `strict_slashes` and a trailing slash get an extra empty
//! literal segment, so `/docs/` and `/docs` land on different terminals.

use http::Method;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

use super::core::Route;
use super::pattern::{Constraint, ParamValue, Segment};

/// Positional parameter values captured during a lookup.
pub(crate) type Captures = SmallVec<[ParamValue; 8]>;

#[derive(Default)]
struct Node {
    literals: HashMap<Box<str>, Node>,
    params: Vec<ParamEdge>,
    tail: Option<Box<Node>>,
    routes: Vec<(Method, Arc<Route>)>,
}

struct ParamEdge {
    constraint: Constraint,
    node: Node,
}

/// Outcome of walking the trie for one path.
pub(crate) enum Lookup {
    Found(Arc<Route>, Captures),
    /// The path exists, but not for this method. Carries every method that does match.
    WrongMethod(Vec<Method>),
    Missing,
}

/// Key used when descending into a node: either the route's own segment or the
/// synthetic empty literal marking a strict trailing slash.
enum Step<'a> {
    Segment(&'a Segment),
    TrailingSlash,
}

fn steps(route: &Route) -> impl Iterator<Item = Step<'_>> {
    let slash = route.strict_slashes() && route.pattern().has_trailing_slash();
    route
        .pattern()
        .segments()
        .iter()
        .map(Step::Segment)
        .chain(slash.then_some(Step::TrailingSlash))
}

impl Node {
    fn insert<'s>(&mut self, mut steps: impl Iterator<Item = Step<'s>>, route: &Arc<Route>) {
        let Some(step) = steps.next() else {
            for method in route.methods() {
                self.routes.push((method.clone(), Arc::clone(route)));
            }
            return;
        };
        let child = match step {
            Step::TrailingSlash => self.literals.entry("".into()).or_default(),
            Step::Segment(Segment::Literal(lit)) => self.literals.entry(lit.clone()).or_default(),
            Step::Segment(Segment::Param {
                constraint: Constraint::Path,
                ..
            }) => self.tail.get_or_insert_with(Box::default),
            Step::Segment(Segment::Param { constraint, .. }) => {
                let pos = match self.params.iter().position(|e| &e.constraint == constraint) {
                    Some(pos) => pos,
                    None => {
                        self.params.push(ParamEdge {
                            constraint: constraint.clone(),
                            node: Node::default(),
                        });
                        self.params.len() - 1
                    }
                };
                &mut self.params[pos].node
            }
        };
        child.insert(steps, route);
    }

    fn has_method(&self, method: &Method) -> bool {
        self.routes.iter().any(|(m, _)| m == method)
    }

    /// True if a route already registered here would always be chosen over a new route
    /// with the remaining `steps` for `method`.
    fn shadows(&self, steps: &[Step<'_>], method: &Method) -> bool {
        let Some((step, rest)) = steps.split_first() else {
            return self.has_method(method);
        };
        match step {
            Step::TrailingSlash => self
                .literals
                .get("")
                .is_some_and(|child| child.shadows(rest, method)),
            Step::Segment(Segment::Literal(lit)) => self
                .literals
                .get(&**lit)
                .is_some_and(|child| child.shadows(rest, method)),
            Step::Segment(Segment::Param {
                constraint: Constraint::Path,
                ..
            }) => self.tail.as_ref().is_some_and(|t| t.has_method(method)),
            Step::Segment(Segment::Param { constraint, .. }) => {
                // Lookup tries edges in order, so only the new route's own edge and the
                // ones ahead of it can take a value first.
                let own = self
                    .params
                    .iter()
                    .position(|e| &e.constraint == constraint)
                    .map_or(self.params.len(), |pos| pos + 1);
                self.params[..own]
                    .iter()
                    .filter(|e| e.constraint.covers(constraint))
                    .any(|e| e.node.shadows(rest, method))
            }
        }
    }

    fn search(
        &self,
        segments: &[&str],
        method: &Method,
        loose: bool,
        captures: &mut Captures,
        allowed: &mut Vec<Method>,
    ) -> Option<Arc<Route>> {
        let Some((segment, rest)) = segments.split_first() else {
            return self.terminal(method, loose, allowed);
        };

        if let Some(child) = self.literals.get(*segment) {
            if let Some(route) = child.search(rest, method, loose, captures, allowed) {
                return Some(route);
            }
        }

        if !self.params.is_empty() {
            if let Ok(decoded) = urlencoding::decode(segment) {
                for edge in &self.params {
                    let Some(value) = edge.constraint.coerce(&decoded) else {
                        continue;
                    };
                    captures.push(value);
                    if let Some(route) = edge.node.search(rest, method, loose, captures, allowed) {
                        return Some(route);
                    }
                    captures.pop();
                }
            }
        }

        if let Some(tail) = &self.tail {
            if segments.iter().any(|s| !s.is_empty()) {
                let mut joined = String::new();
                for (i, s) in segments.iter().enumerate() {
                    if i > 0 {
                        joined.push('/');
                    }
                    joined.push_str(&urlencoding::decode(s).ok()?);
                }
                captures.push(ParamValue::Str(joined));
                if let Some(route) = tail.terminal(method, loose, allowed) {
                    return Some(route);
                }
                captures.pop();
            }
        }

        None
    }

    /// Pick the route for `method` at a terminal node, recording alternatives otherwise.
    /// `loose` means a trailing slash was stripped, which only non-strict routes accept.
    fn terminal(&self, method: &Method, loose: bool, allowed: &mut Vec<Method>) -> Option<Arc<Route>> {
        let eligible = |r: &Arc<Route>| !loose || !r.strict_slashes();
        let pick = |want: &Method| {
            self.routes
                .iter()
                .find(|(m, r)| m == want && eligible(r))
                .map(|(_, r)| Arc::clone(r))
        };
        if let Some(route) = pick(method) {
            return Some(route);
        }
        if method == Method::HEAD {
            if let Some(route) = pick(&Method::GET) {
                return Some(route);
            }
        }
        for (m, r) in &self.routes {
            if eligible(r) && !allowed.contains(m) {
                allowed.push(m.clone());
            }
        }
        None
    }
}

/// The trie itself. Insertions happen only while the application is being configured.
#[derive(Default)]
pub(crate) struct RadixTree {
    root: Node,
}

impl RadixTree {
    /// Methods of `route` that an already registered route makes unreachable.
    pub(crate) fn conflicts(&self, route: &Route) -> Vec<Method> {
        let steps: Vec<Step<'_>> = steps(route).collect();
        route
            .methods()
            .iter()
            .filter(|m| self.root.shadows(&steps, m))
            .cloned()
            .collect()
    }

    pub(crate) fn insert(&mut self, route: &Arc<Route>) {
        self.root.insert(steps(route), route);
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: SmallVec<[&str; 16]> = if trimmed.is_empty() {
            SmallVec::new()
        } else {
            trimmed.split('/').collect()
        };

        let mut captures = Captures::new();
        let mut allowed = Vec::new();
        if let Some(route) = self
            .root
            .search(&segments, method, false, &mut captures, &mut allowed)
        {
            return Lookup::Found(route, captures);
        }

        if let Some((&"", without_slash)) = segments.split_last() {
            captures.clear();
            if let Some(route) =
                self.root
                    .search(without_slash, method, true, &mut captures, &mut allowed)
            {
                return Lookup::Found(route, captures);
            }
        }

        if allowed.is_empty() {
            Lookup::Missing
        } else {
            Lookup::WrongMethod(allowed)
        }
    }
}

//! Route pattern parsing and parameter constraints.
//!
//! A pattern is a `/`-separated list of segments. Each segment is either a literal or a
//! parameter in braces:
//!
//! | Segment            | Matches                                   | Value             |
//! |--------------------|-------------------------------------------|-------------------|
//! | `{id}`, `{id:str}` | any non-empty segment                     | `ParamValue::Str` |
//! | `{id:int}`         | optional `-` followed by digits           | `ParamValue::Int` |
//! | `{x:number}`       | integer or decimal                        | `ParamValue::Number` |
//! | `{name:alpha}`     | ASCII letters                             | `ParamValue::Str` |
//! | `{rest:path}`      | the rest of the path, `/` included (last) | `ParamValue::Str` |
//! | `{code:[A-Z]{3}}`  | the full segment against the regex        | `ParamValue::Str` |

use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};

/// Constraint attached to a parameter segment.
#[derive(Debug, Clone)]
pub enum Constraint {
    Str,
    Int,
    Number,
    Alpha,
    /// Greedy tail. Only valid as the last segment.
    Path,
    /// Custom regular expression, anchored to the whole segment.
    Pattern(Regex),
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constraint::Pattern(a), Constraint::Pattern(b)) => a.as_str() == b.as_str(),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Constraint {
    fn parse(spec: &str) -> Result<Self, Error> {
        Ok(match spec {
            "" | "str" | "string" => Constraint::Str,
            "int" => Constraint::Int,
            "number" => Constraint::Number,
            "alpha" => Constraint::Alpha,
            "path" => Constraint::Path,
            custom => {
                let anchored = format!("^(?:{custom})$");
                let re = Regex::new(&anchored).map_err(|e| {
                    Error::new(
                        ErrorKind::InvalidRoute,
                        format!("invalid parameter expression `{custom}`"),
                    )
                    .with_source(e)
                })?;
                Constraint::Pattern(re)
            }
        })
    }

    /// Coerce an already percent-decoded segment, or `None` if it does not satisfy the
    /// constraint.
    #[must_use]
    pub fn coerce(&self, raw: &str) -> Option<ParamValue> {
        if raw.is_empty() {
            return None;
        }
        match self {
            Constraint::Str | Constraint::Path => Some(ParamValue::Str(raw.to_owned())),
            Constraint::Int => {
                let digits = raw.strip_prefix('-').unwrap_or(raw);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                raw.parse().ok().map(ParamValue::Int)
            }
            Constraint::Number => {
                let unsigned = raw.strip_prefix('-').unwrap_or(raw);
                let mut dots = 0;
                let mut digits = 0;
                for b in unsigned.bytes() {
                    match b {
                        b'.' => dots += 1,
                        b'0'..=b'9' => digits += 1,
                        _ => return None,
                    }
                }
                if digits == 0 || dots > 1 {
                    return None;
                }
                raw.parse().ok().map(ParamValue::Number)
            }
            Constraint::Alpha => raw
                .bytes()
                .all(|b| b.is_ascii_alphabetic())
                .then(|| ParamValue::Str(raw.to_owned())),
            Constraint::Pattern(re) => re
                .is_match(raw)
                .then(|| ParamValue::Str(raw.to_owned())),
        }
    }

    /// True if every segment accepted by `other` is also accepted by `self`.
    #[must_use]
    pub fn covers(&self, other: &Constraint) -> bool {
        match (self, other) {
            (_, Constraint::Path) | (Constraint::Path, _) => false,
            (Constraint::Str, _) => true,
            (Constraint::Number, Constraint::Int) => true,
            (a, b) => a == b,
        }
    }

    pub(crate) fn label(&self) -> &str {
        match self {
            Constraint::Str => "str",
            Constraint::Int => "int",
            Constraint::Number => "number",
            Constraint::Alpha => "alpha",
            Constraint::Path => "path",
            Constraint::Pattern(re) => {
                let s = re.as_str();
                s.strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(")$"))
                    .unwrap_or(s)
            }
        }
    }
}

/// Typed value of a matched path parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Number(f64),
    Str(String),
}

impl ParamValue {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Number(v) => Some(*v),
            ParamValue::Str(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Number(v) => write!(f, "{v}"),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

/// One parsed segment of a route pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(Box<str>),
    Param {
        name: Arc<str>,
        constraint: Constraint,
    },
}

/// A parsed route pattern such as `/users/{id:int}/posts`.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_slash: bool,
}

impl Pattern {
    /// Parse a pattern. Patterns must start with `/`, parameter names must be unique and
    /// a `path` parameter may only appear last.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid =
            |msg: String| Error::new(ErrorKind::InvalidRoute, format!("{raw}: {msg}"));

        let Some(body) = raw.strip_prefix('/') else {
            return Err(invalid("pattern must start with '/'".into()));
        };

        let mut parts = split_segments(body).map_err(invalid)?;
        let trailing_slash = parts.len() > 1 && parts.last().is_some_and(|p| p.is_empty());
        if trailing_slash || parts.as_slice() == [""] {
            parts.pop();
        }

        let mut segments = Vec::with_capacity(parts.len());
        let count = parts.len();
        for (i, part) in parts.into_iter().enumerate() {
            if part.is_empty() {
                return Err(invalid("empty segment".into()));
            }
            let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) else {
                if part.contains(['{', '}']) {
                    return Err(invalid(format!("malformed segment `{part}`")));
                }
                segments.push(Segment::Literal(part.into()));
                continue;
            };

            let (name, spec) = inner.split_once(':').unwrap_or((inner, ""));
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(invalid(format!("invalid parameter name `{name}`")));
            }
            let duplicate = segments
                .iter()
                .any(|s| matches!(s, Segment::Param { name: n, .. } if n.as_ref() == name));
            if duplicate {
                return Err(invalid(format!("duplicate parameter `{name}`")));
            }
            let constraint = Constraint::parse(spec.trim())?;
            if constraint == Constraint::Path && (i + 1 != count || trailing_slash) {
                return Err(invalid(format!("`{name}:path` must be the last segment")));
            }
            segments.push(Segment::Param {
                name: Arc::from(name),
                constraint,
            });
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
            trailing_slash,
        })
    }

    /// The pattern as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn has_trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    /// Parameter names in positional order.
    pub fn param_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, .. } => Some(name),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split on `/` outside of braces so that regex constraints may contain slashes.
fn split_segments(body: &str) -> Result<Vec<&str>, String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced '}'".to_string())?;
            }
            '/' if depth == 0 => {
                out.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '{'".into());
    }
    out.push(&body[start..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals_and_params() {
        let p = Pattern::parse("/users/{id:int}/posts").unwrap();
        assert_eq!(p.segments().len(), 3);
        assert_eq!(p.segments()[0], Segment::Literal("users".into()));
        assert!(matches!(
            &p.segments()[1],
            Segment::Param { name, constraint: Constraint::Int } if name.as_ref() == "id"
        ));
        assert!(!p.has_trailing_slash());
    }

    #[test]
    fn test_root_and_trailing_slash() {
        let root = Pattern::parse("/").unwrap();
        assert!(root.segments().is_empty());
        assert!(!root.has_trailing_slash());

        let slashed = Pattern::parse("/docs/").unwrap();
        assert_eq!(slashed.segments().len(), 1);
        assert!(slashed.has_trailing_slash());
    }

    #[test]
    fn test_regex_constraint_may_contain_slash_and_braces() {
        let p = Pattern::parse(r"/codes/{code:[A-Z]{3}}").unwrap();
        let Segment::Param { constraint, .. } = &p.segments()[1] else {
            panic!("expected param");
        };
        assert!(constraint.coerce("ABC").is_some());
        assert!(constraint.coerce("ABCD").is_none());
        assert_eq!(constraint.label(), "[A-Z]{3}");

        let p = Pattern::parse("/f/{p:a/b}").unwrap();
        assert_eq!(p.segments().len(), 2);
    }

    #[test]
    fn test_rejects_bad_patterns() {
        for bad in [
            "users",
            "/a//b",
            "/{}",
            "/{id}/{id}",
            "/{rest:path}/tail",
            "/{open",
            "/x}",
            "/{bad:(}",
        ] {
            let err = Pattern::parse(bad).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidRoute, "pattern {bad}");
        }
    }

    #[test]
    fn test_coercion() {
        assert_eq!(Constraint::Int.coerce("-42"), Some(ParamValue::Int(-42)));
        assert_eq!(Constraint::Int.coerce("4.2"), None);
        assert_eq!(Constraint::Int.coerce("-"), None);
        assert_eq!(Constraint::Number.coerce("4.5"), Some(ParamValue::Number(4.5)));
        assert_eq!(Constraint::Number.coerce("1.2.3"), None);
        assert_eq!(Constraint::Number.coerce("inf"), None);
        assert_eq!(Constraint::Alpha.coerce("abc"), Some(ParamValue::Str("abc".into())));
        assert_eq!(Constraint::Alpha.coerce("ab1"), None);
        assert_eq!(Constraint::Str.coerce(""), None);
    }

    #[test]
    fn test_covers() {
        assert!(Constraint::Str.covers(&Constraint::Int));
        assert!(Constraint::Number.covers(&Constraint::Int));
        assert!(!Constraint::Int.covers(&Constraint::Number));
        assert!(!Constraint::Alpha.covers(&Constraint::Str));
        assert!(!Constraint::Str.covers(&Constraint::Path));
    }

    #[test]
    fn test_param_value_views() {
        assert_eq!(ParamValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(ParamValue::Str("x".into()).as_i64(), None);
        assert_eq!(ParamValue::Number(1.5).to_string(), "1.5");
    }
}

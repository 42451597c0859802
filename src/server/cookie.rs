//! `Set-Cookie` values.
//!
//! A [`Cookie`] is validated when it is built, so an accepted cookie can always be put on
//! the wire without smuggling extra attributes through its value.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{Error, ErrorKind};

/// Attribute names that may not be used as cookie names.
const RESERVED: [&str; 8] = [
    "expires", "path", "comment", "domain", "max-age", "secure", "httponly", "version",
];

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::InvalidHeader, message)
}

fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// cookie-octet: visible ASCII except `"`, `,`, `;` and `\`.
fn is_cookie_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| matches!(b, 0x21 | 0x23..=0x2b | 0x2d..=0x3a | 0x3c..=0x5b | 0x5d..=0x7e))
}

fn is_attribute_value(value: &str) -> bool {
    value.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b';')
}

/// One cookie to send with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<u64>,
    expires: Option<DateTime<Utc>>,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    /// A cookie scoped to `Path=/`.
    ///
    /// Fails with `InvalidHeader` when the name is not a token or is an attribute name,
    /// or when the value holds whitespace, `"`, `,`, `;`, `\` or control characters.
    pub fn new(name: &str, value: &str) -> Result<Self, Error> {
        if !is_token(name) {
            return Err(invalid(format!("invalid cookie name `{}`", name.escape_debug())));
        }
        if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return Err(invalid(format!("cookie name `{name}` is a reserved word")));
        }
        if !is_cookie_value(value) {
            return Err(invalid(format!(
                "cookie `{name}` has an illegal character in its value"
            )));
        }
        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
            path: Some("/".to_owned()),
            domain: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: false,
        })
    }

    /// A cookie that tells the client to drop `name`.
    pub fn removal(name: &str) -> Result<Self, Error> {
        Ok(Self::new(name, "")?
            .max_age(0)
            .expires(DateTime::<Utc>::UNIX_EPOCH))
    }

    pub fn path(mut self, path: &str) -> Result<Self, Error> {
        if !is_attribute_value(path) {
            return Err(invalid(format!("invalid cookie path `{}`", path.escape_debug())));
        }
        self.path = Some(path.to_owned());
        Ok(self)
    }

    pub fn domain(mut self, domain: &str) -> Result<Self, Error> {
        if domain.is_empty() || !is_attribute_value(domain) || domain.contains(' ') {
            return Err(invalid(format!("invalid cookie domain `{}`", domain.escape_debug())));
        }
        self.domain = Some(domain.to_owned());
        Ok(self)
    }

    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    #[must_use]
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    #[must_use]
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if let Some(expires) = &self.expires {
            write!(f, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_attributes_rendered_in_order() {
        let expires = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let cookie = Cookie::new("session", "abc123")
            .unwrap()
            .path("/app")
            .unwrap()
            .domain("example.com")
            .unwrap()
            .max_age(3600)
            .expires(expires)
            .secure()
            .http_only();
        assert_eq!(
            cookie.to_string(),
            "session=abc123; Path=/app; Domain=example.com; Max-Age=3600; \
             Expires=Wed, 02 Jan 2030 03:04:05 GMT; Secure; HttpOnly"
        );
    }

    #[test]
    fn test_default_path_is_root() {
        assert_eq!(Cookie::new("a", "1").unwrap().to_string(), "a=1; Path=/");
    }

    #[test]
    fn test_removal_expires_immediately() {
        assert_eq!(
            Cookie::removal("session").unwrap().to_string(),
            "session=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn test_attribute_injection_rejected() {
        for value in ["x; Domain=evil.com", "a,b", "with space", "q\"uote", "back\\slash", "nl\r\n"] {
            let err = Cookie::new("session", value).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidHeader, "{value:?}");
        }
        for name in ["", "bad name", "a=b", "Path", "max-age"] {
            assert!(Cookie::new(name, "v").is_err(), "{name:?}");
        }
        let cookie = Cookie::new("a", "1").unwrap();
        assert!(cookie.clone().path("/x; Secure").is_err());
        assert!(cookie.domain("evil.com\r\n").is_err());
    }
}

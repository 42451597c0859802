//! Form bodies: `application/x-www-form-urlencoded` and `multipart/form-data`.

use bytes::Bytes;

use crate::error::Error;

/// A file part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field the file was sent under.
    pub field: String,
    /// Client-side file name, if one was given.
    pub file_name: Option<String>,
    /// Declared content type of the part.
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Decoded form fields and uploaded files, both in body order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

impl FormData {
    /// First value of a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First file sent under `field`.
    #[must_use]
    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field == field)
    }
}

fn malformed(what: &str) -> Error {
    Error::invalid_usage(format!("malformed multipart body: {what}"))
}

/// Split a header value like `form-data; name="a"; filename="b;c.txt"` into its main value
/// and lowercase-keyed parameters. Quoted strings may contain `;`.
pub(crate) fn split_params(value: &str) -> (&str, Vec<(String, String)>) {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);

    let main = parts.first().map_or("", |p| p.trim());
    let params = parts
        .iter()
        .skip(1)
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            let v = v.trim();
            let v = match v.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
                None => v.to_owned(),
            };
            Some((k.trim().to_ascii_lowercase(), v))
        })
        .collect();
    (main, params)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Parse a `multipart/form-data` body delimited by `boundary`.
///
/// Parts with a `filename` or their own `Content-Type` become files; the rest must be
/// UTF-8 text fields. Anything that does not follow the framing is `InvalidUsage`.
pub(crate) fn parse_multipart(body: &Bytes, boundary: &str) -> Result<FormData, Error> {
    if boundary.is_empty() {
        return Err(malformed("empty boundary"));
    }
    let delimiter = format!("--{boundary}");
    let next_part = format!("\r\n--{boundary}");
    let mut pos = find(body, delimiter.as_bytes(), 0)
        .ok_or_else(|| malformed("opening boundary not found"))?
        + delimiter.len();

    let mut form = FormData::default();
    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(form);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(malformed("boundary not followed by CRLF"));
        }
        let start = pos + 2;
        let end = find(body, next_part.as_bytes(), start)
            .ok_or_else(|| malformed("closing boundary not found"))?;
        parse_part(body.slice(start..end), &mut form)?;
        pos = end + next_part.len();
    }
}

fn parse_part(part: Bytes, form: &mut FormData) -> Result<(), Error> {
    let (head, content) = if part.starts_with(b"\r\n") {
        (&b""[..], part.slice(2..))
    } else {
        let split =
            find(&part, b"\r\n\r\n", 0).ok_or_else(|| malformed("part without headers"))?;
        (&part[..split], part.slice(split + 4..))
    };
    let head = std::str::from_utf8(head)
        .map_err(|e| malformed("part headers are not UTF-8").with_source(e))?;

    let mut field = None;
    let mut file_name = None;
    let mut content_type = None;
    for line in head.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed("part header without a colon"))?;
        let (value, params) = split_params(value);
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            for (k, v) in params {
                match k.as_str() {
                    "name" => field = Some(v),
                    "filename" => file_name = Some(v),
                    _ => {}
                }
            }
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_owned());
        }
    }
    let field = field.ok_or_else(|| malformed("part without a field name"))?;

    if file_name.is_some() || content_type.is_some() {
        form.files.push(UploadedFile {
            field,
            file_name,
            content_type,
            body: content,
        });
    } else {
        let value = String::from_utf8(content.to_vec())
            .map_err(|e| malformed("text field is not UTF-8").with_source(e))?;
        form.fields.push((field, value));
    }
    Ok(())
}

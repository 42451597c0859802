//! HTTP/1.1 wire codec: request head parsing, chunked body decoding and response
//! serialization.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::{HeaderName, Method, Version};
use std::fmt;

use super::response::Response;

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: usize = 4096;

/// Final frame of a chunked body.
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Parsed request line and header fields.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn connection_has(&self, token: &str) -> bool {
        self.header_all("connection")
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Whether the client wants the connection kept open after this exchange.
    pub fn wants_keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.connection_has("close"),
            _ => self.connection_has("keep-alive"),
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }

    /// Work out how the body is delimited.
    pub fn framing(&self) -> Result<Framing, HeadError> {
        let te: Vec<&str> = self.header_all("transfer-encoding").collect();
        let cl: Vec<&str> = self.header_all("content-length").collect();

        if !te.is_empty() {
            if !cl.is_empty() {
                return Err(HeadError::Malformed("both Transfer-Encoding and Content-Length"));
            }
            let codings: Vec<&str> = te
                .iter()
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            return if codings.len() == 1 && codings[0].eq_ignore_ascii_case("chunked") {
                Ok(Framing::Chunked)
            } else {
                Err(HeadError::Malformed("unsupported transfer coding"))
            };
        }

        let mut length: Option<u64> = None;
        for value in cl.iter().flat_map(|v| v.split(',')) {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(HeadError::Malformed("invalid Content-Length"));
            }
            let parsed: u64 = value
                .parse()
                .map_err(|_| HeadError::Malformed("invalid Content-Length"))?;
            if length.is_some_and(|l| l != parsed) {
                return Err(HeadError::Malformed("conflicting Content-Length values"));
            }
            length = Some(parsed);
        }
        Ok(match length {
            Some(0) | None => Framing::Empty,
            Some(n) => Framing::Length(n),
        })
    }
}

/// How a request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Empty,
    Length(u64),
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeadError {
    Malformed(&'static str),
    TooLarge,
}

/// Byte offset just past the blank line terminating the head, ignoring leading blank
/// lines. Bare `\n` line endings are tolerated.
fn head_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    let mut seen_content = false;
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            if seen_content {
                return Some(i + 1);
            }
        } else {
            seen_content = true;
        }
        line_start = i + 1;
    }
    None
}

/// Try to parse a request head from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, or the head and the number of bytes it
/// occupied.
pub(crate) fn parse_head(
    buf: &[u8],
    max_header_size: usize,
) -> Result<Option<(RequestHead, usize)>, HeadError> {
    let Some(end) = head_end(buf) else {
        return if buf.len() > max_header_size {
            Err(HeadError::TooLarge)
        } else {
            Ok(None)
        };
    };
    if end > max_header_size {
        return Err(HeadError::TooLarge);
    }

    let text = std::str::from_utf8(&buf[..end])
        .map_err(|_| HeadError::Malformed("request head is not valid UTF-8"))?;
    let mut lines = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .skip_while(|l| l.is_empty());

    let request_line = lines
        .next()
        .ok_or(HeadError::Malformed("missing request line"))?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HeadError::Malformed("malformed request line"));
    };

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HeadError::Malformed("invalid method"))?;
    if target.is_empty() || !(target.starts_with('/') || target == "*") {
        return Err(HeadError::Malformed("invalid request target"));
    }
    if target.bytes().any(|b| b.is_ascii_control()) {
        return Err(HeadError::Malformed("invalid request target"));
    }
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        _ => return Err(HeadError::Malformed("unsupported HTTP version")),
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            return Err(HeadError::Malformed("obsolete header line folding"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(HeadError::Malformed("header line without ':'"))?;
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(HeadError::Malformed("invalid header name"));
        }
        let value = value.trim_matches([' ', '\t']);
        if value.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
            return Err(HeadError::Malformed("invalid header value"));
        }
        headers.push((name.to_string(), value.to_string()));
    }

    Ok(Some((
        RequestHead {
            method,
            target: target.to_string(),
            version,
            headers,
        },
        end,
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Output of one [`ChunkedDecoder::decode`] step.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decoded {
    Chunk(Bytes),
    NeedMore,
    Done,
}

/// Incremental decoder for `Transfer-Encoding: chunked` request bodies.
#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: ChunkState,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }

    fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, HeadError> {
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) if pos <= MAX_CHUNK_LINE => {
                let mut line = buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                Ok(Some(line))
            }
            Some(_) => Err(HeadError::Malformed("chunk line too long")),
            None if buf.len() > MAX_CHUNK_LINE => Err(HeadError::Malformed("chunk line too long")),
            None => Ok(None),
        }
    }

    /// Consume bytes from the front of `buf`, yielding at most one chunk per call.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, HeadError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = Self::take_line(buf)? else {
                        return Ok(Decoded::NeedMore);
                    };
                    let size_part = line[..].split(|&b| b == b';').next().unwrap_or_default();
                    let size_str = std::str::from_utf8(size_part)
                        .map_err(|_| HeadError::Malformed("invalid chunk size"))?
                        .trim();
                    if size_str.is_empty() || size_str.len() > 16 {
                        return Err(HeadError::Malformed("invalid chunk size"));
                    }
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| HeadError::Malformed("invalid chunk size"))?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let n = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
                    let chunk = buf.split_to(n).freeze();
                    let left = remaining - n as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    return Ok(Decoded::Chunk(chunk));
                }
                ChunkState::DataEnd => {
                    if buf.starts_with(b"\r\n") {
                        buf.advance(2);
                    } else if buf.starts_with(b"\n") {
                        buf.advance(1);
                    } else if buf.is_empty() || buf.as_ref() == b"\r" {
                        return Ok(Decoded::NeedMore);
                    } else {
                        return Err(HeadError::Malformed("missing CRLF after chunk data"));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = Self::take_line(buf)? else {
                        return Ok(Decoded::NeedMore);
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(Decoded::Done),
            }
        }
    }
}

/// Whether a response to `method` with `status` carries no body on the wire.
pub(crate) fn is_bodyless(method: &Method, status: u16) -> bool {
    method == Method::HEAD || (100..200).contains(&status) || status == 204 || status == 304
}

/// How the response body will be written after the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyEncoding {
    /// Buffered body of this length (written only when not bodyless).
    Length(usize),
    /// Chunked transfer coding.
    Chunked,
    /// Raw bytes until the connection closes (streaming to HTTP/1.0 clients).
    CloseDelimited,
    /// Nothing follows the head.
    None,
}

/// Serialize the status line and headers.
///
/// Framing headers (`Content-Length`, `Transfer-Encoding`, `Connection`, `Keep-Alive`) are
/// always written by the codec; values set on the response for them are replaced.
pub(crate) fn encode_head(
    res: &Response,
    version: Version,
    keep_alive: Option<u64>,
    encoding: BodyEncoding,
) -> BytesMut {
    let mut out = BytesMut::with_capacity(256);
    let proto = if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    put_fmt(
        &mut out,
        format_args!("{proto} {} {}\r\n", res.status(), res.reason()),
    );
    for (name, value) in res.headers() {
        if ["content-length", "transfer-encoding", "connection", "keep-alive"]
            .iter()
            .any(|h| name.eq_ignore_ascii_case(h))
        {
            continue;
        }
        put_fmt(&mut out, format_args!("{name}: {value}\r\n"));
    }
    match encoding {
        BodyEncoding::Length(n) => put_fmt(&mut out, format_args!("Content-Length: {n}\r\n")),
        BodyEncoding::Chunked => out.put_slice(b"Transfer-Encoding: chunked\r\n"),
        BodyEncoding::CloseDelimited | BodyEncoding::None => {}
    }
    match keep_alive {
        Some(timeout) => put_fmt(
            &mut out,
            format_args!("Connection: keep-alive\r\nKeep-Alive: timeout={timeout}\r\n"),
        ),
        None => out.put_slice(b"Connection: close\r\n"),
    }
    out.put_slice(b"\r\n");
    out
}

/// Frame one chunk of a chunked response body.
pub(crate) fn encode_chunk(data: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(data.len() + 12);
    put_fmt(&mut out, format_args!("{:x}\r\n", data.len()));
    out.put_slice(data);
    out.put_slice(b"\r\n");
    out
}

#[allow(clippy::let_underscore_must_use)]
fn put_fmt(out: &mut BytesMut, args: fmt::Arguments<'_>) {
    // BytesMut grows on demand; its fmt::Write impl never fails.
    let _ = fmt::Write::write_fmt(out, args);
}

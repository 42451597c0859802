#![allow(dead_code)]

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }
}

pub mod mock {
    use machwire::server::Transport;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// In-memory connection. Each scripted chunk is returned by one `read` call. Once the
    /// script runs out the stream reports EOF, or a read timeout when built with
    /// [`MockStream::stalling`].
    pub struct MockStream {
        input: VecDeque<Vec<u8>>,
        stall: bool,
        output: Arc<Mutex<Vec<u8>>>,
        shut: Arc<AtomicBool>,
    }

    /// What the server wrote, readable after the protocol finishes.
    #[derive(Clone)]
    pub struct Written {
        output: Arc<Mutex<Vec<u8>>>,
        shut: Arc<AtomicBool>,
    }

    impl Written {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
        }

        pub fn was_shut_down(&self) -> bool {
            self.shut.load(Ordering::SeqCst)
        }
    }

    impl MockStream {
        pub fn new<I, B>(chunks: I) -> (Self, Written)
        where
            I: IntoIterator<Item = B>,
            B: AsRef<[u8]>,
        {
            let output = Arc::new(Mutex::new(Vec::new()));
            let shut = Arc::new(AtomicBool::new(false));
            let stream = Self {
                input: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
                stall: false,
                output: Arc::clone(&output),
                shut: Arc::clone(&shut),
            };
            (stream, Written { output, shut })
        }

        /// Like [`new`](Self::new) but the peer goes quiet instead of closing.
        pub fn stalling<I, B>(chunks: I) -> (Self, Written)
        where
            I: IntoIterator<Item = B>,
            B: AsRef<[u8]>,
        {
            let (mut stream, written) = Self::new(chunks);
            stream.stall = true;
            (stream, written)
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.input.pop_front() else {
                return if self.stall {
                    Err(io::Error::from(io::ErrorKind::TimedOut))
                } else {
                    Ok(0)
                };
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.input.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.shut.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.output.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for MockStream {
        fn set_read_timeout(&self, _dur: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&self, _dur: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 40_000)))
        }

        fn shutdown(&self) -> io::Result<()> {
            self.shut.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// A parsed response off the wire.
    #[derive(Debug)]
    pub struct ParsedResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl ParsedResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn body_text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Parse every response in `raw`, in order. Interim `1xx` responses are skipped. A
    /// response with neither `Content-Length` nor chunked encoding takes the rest.
    pub fn parse_responses(raw: &[u8]) -> Vec<ParsedResponse> {
        let mut out = Vec::new();
        let mut rest = raw;
        while let Some(end) = find(rest, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&rest[..end]).into_owned();
            rest = &rest[end + 4..];
            let mut lines = head.split("\r\n");
            let status = lines
                .next()
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let headers: Vec<(String, String)> = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            let mut res = ParsedResponse {
                status,
                headers,
                body: Vec::new(),
            };
            if (100..200).contains(&status) {
                continue;
            }
            if let Some(len) = res.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
                let len = len.min(rest.len());
                res.body = rest[..len].to_vec();
                rest = &rest[len..];
            } else if res
                .header("transfer-encoding")
                .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
            {
                while let Some(line_end) = find(rest, b"\r\n") {
                    let size = usize::from_str_radix(
                        String::from_utf8_lossy(&rest[..line_end]).trim(),
                        16,
                    )
                    .unwrap_or(0);
                    rest = &rest[line_end + 2..];
                    if size == 0 {
                        rest = &rest[2.min(rest.len())..];
                        break;
                    }
                    res.body.extend_from_slice(&rest[..size]);
                    rest = &rest[size + 2..];
                }
            } else if status != 204 && status != 304 {
                res.body = rest.to_vec();
                rest = &[];
            }
            out.push(res);
        }
        out
    }

    pub fn parse_response(raw: &[u8]) -> ParsedResponse {
        parse_responses(raw)
            .into_iter()
            .next()
            .expect("no complete response")
    }

    /// Send raw bytes and read until the server closes the connection.
    pub fn send_raw(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(raw).unwrap();
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    }

    /// Read exactly one response with a `Content-Length` body from an open connection.
    pub fn read_one(stream: &mut TcpStream) -> ParsedResponse {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = find(&buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    return parse_response(&buf[..end + 4 + len]);
                }
            }
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before a full response arrived");
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

//! End-to-end tests over real TCP sockets.

mod common;

use common::http::{parse_response, read_one, send_raw};
use common::test_server::setup_may_runtime;
use machwire::config::ServerConfig;
use machwire::server::ServerHandle;
use machwire::{App, Response, Signal};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Running server that is stopped when the fixture goes out of scope.
///
/// Keeps tests from leaking listeners when an assertion fails half way through.
struct ServerFixture {
    handle: Option<ServerHandle>,
}

impl ServerFixture {
    fn start(app: &Arc<App>) -> Self {
        setup_may_runtime();
        let handle = app.serve("127.0.0.1:0").unwrap();
        handle.wait_ready().unwrap();
        Self {
            handle: Some(handle),
        }
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.handle.as_ref().unwrap().addr()
    }

    fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

impl Drop for ServerFixture {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn quick_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.http.graceful_shutdown_secs = 2;
    config
}

#[test]
fn test_keep_alive_over_tcp() {
    let app = App::builder()
        .config(quick_config())
        .get("/hello/{name:alpha}", |req| {
            let name = req.param("name").map(ToString::to_string).unwrap_or_default();
            Ok(Response::text(format!("hello {name}")))
        })
        .build()
        .unwrap();
    let server = ServerFixture::start(&app);

    let mut stream = connect(server.addr());
    stream.write_all(b"GET /hello/ada HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    let first = read_one(&mut stream);
    assert_eq!(first.status, 200);
    assert_eq!(first.body_text(), "hello ada");
    assert_eq!(first.header("connection"), Some("keep-alive"));

    stream.write_all(b"GET /hello/bob HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    assert_eq!(read_one(&mut stream).body_text(), "hello bob");

    stream.write_all(b"GET /hello/42 HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
    assert_eq!(read_one(&mut stream).status, 404);

    server.stop();
}

#[test]
fn test_bad_request_over_tcp() {
    let app = App::builder().config(quick_config()).build().unwrap();
    let server = ServerFixture::start(&app);

    let raw = send_raw(server.addr(), b"NOT HTTP AT ALL\r\n\r\n");
    let res = parse_response(&raw);
    assert_eq!(res.status, 400);
    assert_eq!(res.body_text(), "Error: Bad Request");
}

#[test]
fn test_lifecycle_signals_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut builder = App::builder().config(quick_config());
    for signal in [
        Signal::ServerStarting,
        Signal::ServerStarted,
        Signal::ServerStopping,
        Signal::ServerStopped,
    ] {
        let seen = Arc::clone(&seen);
        builder = builder.subscribe(signal, move |ev| {
            assert!(ev.local_addr.is_some());
            seen.lock().unwrap().push(ev.signal);
            Ok(())
        });
    }
    let app = builder.build().unwrap();

    let server = ServerFixture::start(&app);
    assert_eq!(
        *seen.lock().unwrap(),
        [Signal::ServerStarting, Signal::ServerStarted]
    );
    server.stop();
    assert_eq!(
        *seen.lock().unwrap(),
        [
            Signal::ServerStarting,
            Signal::ServerStarted,
            Signal::ServerStopping,
            Signal::ServerStopped,
        ]
    );
}

#[test]
fn test_stop_closes_idle_connections() {
    let app = App::builder()
        .config(quick_config())
        .get("/", |_req| Ok(Response::text("ok")))
        .build()
        .unwrap();
    let server = ServerFixture::start(&app);

    let mut stream = connect(server.addr());
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_one(&mut stream).status, 200);

    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_secs(2));

    let mut buf = [0u8; 16];
    let closed = matches!(stream.read(&mut buf), Ok(0) | Err(_));
    assert!(closed, "idle connection should be closed by stop");
}

#[test]
fn test_stop_waits_for_in_flight_request() {
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    let app = App::builder()
        .config(quick_config())
        .get("/slow", move |_req| {
            flag.store(true, Ordering::SeqCst);
            may::coroutine::sleep(Duration::from_millis(300));
            Ok(Response::text("done"))
        })
        .build()
        .unwrap();
    let server = ServerFixture::start(&app);
    let addr = server.addr();

    let client = thread::spawn(move || {
        let mut stream = connect(addr);
        stream.write_all(b"GET /slow HTTP/1.1\r\n\r\n").unwrap();
        read_one(&mut stream)
    });
    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(5));
    }
    server.stop();

    let res = client.join().unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.body_text(), "done");
    // Keep-alive is withdrawn once the server is stopping.
    assert_eq!(res.header("connection"), Some("close"));
}

#[test]
fn test_graceful_period_elapses_then_force_close() {
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    let mut config = ServerConfig::default();
    config.http.graceful_shutdown_secs = 0;
    let app = App::builder()
        .config(config)
        .get("/stuck", move |_req| {
            flag.store(true, Ordering::SeqCst);
            may::coroutine::sleep(Duration::from_millis(600));
            Ok(Response::text("late"))
        })
        .build()
        .unwrap();
    let server = ServerFixture::start(&app);
    let mut stream = connect(server.addr());
    stream.write_all(b"GET /stuck HTTP/1.1\r\n\r\n").unwrap();
    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(5));
    }

    let begun = Instant::now();
    server.stop();
    assert!(begun.elapsed() < Duration::from_secs(3));

    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    assert!(!String::from_utf8_lossy(&buf).contains("late"));
}

#[test]
fn test_demo_app_streams_countdown() {
    let app = machwire::demo::app(quick_config()).unwrap();
    let server = ServerFixture::start(&app);

    let raw = send_raw(
        server.addr(),
        b"GET /countdown/3 HTTP/1.1\r\nConnection: close\r\n\r\n",
    );
    let res = parse_response(&raw);
    assert_eq!(res.status, 200);
    assert_eq!(res.header("transfer-encoding"), Some("chunked"));
    assert_eq!(res.body_text(), "3\n2\n1\n");
}

#[test]
fn test_demo_app_streaming_upload() {
    let app = machwire::demo::app(quick_config()).unwrap();
    let server = ServerFixture::start(&app);

    let raw = send_raw(
        server.addr(),
        b"POST /upload HTTP/1.1\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n\
          4\r\nabcd\r\n2\r\nef\r\n0\r\n\r\n",
    );
    let res = parse_response(&raw);
    assert_eq!(res.status, 200);
    let v: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(v["bytes"], 6);
}

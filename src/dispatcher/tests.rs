use http::Method;
use std::sync::{Arc, Mutex};

use super::{Dispatcher, Handler};
use crate::error::{Error, ErrorKind};
use crate::error_handler::ErrorHandler;
use crate::middleware::{on_request, on_response, Direction, MiddlewareStack};
use crate::router::{RouteOptions, Router};
use crate::server::{Request, Response};
use crate::signals::{Signal, Signals};

type Log = Arc<Mutex<Vec<String>>>;

fn push(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

fn body(res: &Response) -> String {
    String::from_utf8(res.body_bytes().unwrap().to_vec()).unwrap()
}

fn logging_handler(log: &Log) -> Handler {
    let log = Arc::clone(log);
    Arc::new(move |_req| {
        push(&log, "handler");
        Ok(Response::text("hello"))
    })
}

fn router_with(path: &str, handler: Handler) -> Router {
    let mut router = Router::new();
    router
        .register(&[Method::GET], path, handler, RouteOptions::default())
        .unwrap();
    router
}

fn traced_stack(log: &Log) -> MiddlewareStack {
    let mut stack = MiddlewareStack::default();
    for name in ["a", "b"] {
        let l = Arc::clone(log);
        stack.add(
            Direction::Request,
            on_request(move |_req| {
                push(&l, &format!("before:{name}"));
                Ok(None)
            }),
        );
        let l = Arc::clone(log);
        stack.add(
            Direction::Response,
            on_response(move |_req, _res| {
                push(&l, &format!("after:{name}"));
                Ok(())
            }),
        );
    }
    stack
}

fn error_counter(signals: &mut Signals) -> Arc<Mutex<usize>> {
    let count = Arc::new(Mutex::new(0));
    let c = Arc::clone(&count);
    signals.subscribe(
        Signal::PipelineError,
        Arc::new(move |_ev| {
            *c.lock().unwrap() += 1;
            Ok(())
        }),
    );
    count
}

#[test]
fn test_middleware_order_around_handler() {
    let log: Log = Arc::default();
    let d = Dispatcher::new(
        router_with("/hello", logging_handler(&log)),
        traced_stack(&log),
        Signals::default(),
        ErrorHandler::default(),
    );

    let mut req = Request::new(Method::GET, "/hello");
    let res = d.dispatch(&mut req, None);
    assert_eq!(res.status(), 200);
    assert_eq!(body(&res), "hello");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before:a", "before:b", "handler", "after:b", "after:a"]
    );
}

#[test]
fn test_short_circuit_skips_handler_but_not_after() {
    let log: Log = Arc::default();
    let mut stack = MiddlewareStack::default();
    stack.add(
        Direction::Request,
        on_request(|req| {
            if req.header("authorization").is_none() {
                return Ok(Some(Response::new(401)?));
            }
            Ok(None)
        }),
    );
    stack.add(
        Direction::Request,
        on_request(|_req| panic!("second before hook must not run")),
    );
    let l = Arc::clone(&log);
    stack.add(
        Direction::Response,
        on_response(move |_req, res| {
            push(&l, "after");
            res.set_header("X-Seen", "1")
        }),
    );
    let mut signals = Signals::default();
    let errors = error_counter(&mut signals);

    let d = Dispatcher::new(
        router_with("/hello", logging_handler(&log)),
        stack,
        signals,
        ErrorHandler::default(),
    );
    let mut req = Request::new(Method::GET, "/hello");
    let res = d.dispatch(&mut req, None);
    assert_eq!(res.status(), 401);
    assert_eq!(res.header("x-seen"), Some("1"));
    assert_eq!(*log.lock().unwrap(), vec!["after"]);
    assert_eq!(*errors.lock().unwrap(), 0);
}

#[test]
fn test_not_found_goes_through_error_handler_and_after() {
    let log: Log = Arc::default();
    let mut signals = Signals::default();
    let errors = error_counter(&mut signals);
    let d = Dispatcher::new(
        router_with("/hello", logging_handler(&log)),
        traced_stack(&log),
        signals,
        ErrorHandler::default(),
    );

    let mut req = Request::new(Method::GET, "/missing");
    let res = d.dispatch(&mut req, None);
    assert_eq!(res.status(), 404);
    assert_eq!(body(&res), "Error: Requested URL /missing not found");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before:a", "before:b", "after:b", "after:a"]
    );
    assert_eq!(*errors.lock().unwrap(), 1);
}

#[test]
fn test_params_reach_handler() {
    let mut router = Router::new();
    router
        .register(
            &[Method::GET],
            "/users/{id:int}",
            Arc::new(|req| {
                let id = req.param("id").and_then(|v| v.as_i64()).unwrap_or(-1);
                Ok(Response::text(format!("user {id}")))
            }),
            RouteOptions::default(),
        )
        .unwrap();
    let d = Dispatcher::new(
        router,
        MiddlewareStack::default(),
        Signals::default(),
        ErrorHandler::default(),
    );
    let mut req = Request::new(Method::GET, "/users/42");
    let res = d.dispatch(&mut req, None);
    assert_eq!(body(&res), "user 42");
    assert_eq!(req.route().map(|r| r.pattern().as_str()), Some("/users/{id:int}"));
}

#[test]
fn test_handler_panic_is_contained() {
    let mut eh = ErrorHandler::default();
    eh.register(
        ErrorKind::HandlerPanic,
        Arc::new(|_req, err| Ok(Response::plain(500, format!("caught: {}", err.message())))),
    );
    let d = Dispatcher::new(
        router_with("/boom", Arc::new(|_req| panic!("kaboom"))),
        MiddlewareStack::default(),
        Signals::default(),
        eh,
    );
    let mut req = Request::new(Method::GET, "/boom");
    let res = d.dispatch(&mut req, None);
    assert_eq!(res.status(), 500);
    assert_eq!(body(&res), "caught: kaboom");
}

#[test]
fn test_failing_error_handler_falls_back() {
    let mut eh = ErrorHandler::default();
    eh.register(
        ErrorKind::Http,
        Arc::new(|_req, _err| Err(Error::server_error("error handler broke"))),
    );
    let d = Dispatcher::new(
        Router::new(),
        MiddlewareStack::default(),
        Signals::default(),
        eh,
    );
    let mut req = Request::new(Method::GET, "/anything");
    let res = d.dispatch(&mut req, None);
    assert_eq!(res.status(), 500);
    assert_eq!(body(&res), "An error occurred while handling an error");
}

#[test]
fn test_panicking_error_handler_falls_back() {
    let mut eh = ErrorHandler::default();
    eh.register(ErrorKind::NotFound, Arc::new(|_req, _err| panic!("nested")));
    let d = Dispatcher::new(
        Router::new(),
        MiddlewareStack::default(),
        Signals::default(),
        eh,
    );
    let mut req = Request::new(Method::GET, "/anything");
    let res = d.dispatch(&mut req, None);
    assert_eq!(body(&res), "An error occurred while handling an error");
}

#[test]
fn test_after_middleware_error_stops_unwind() {
    let log: Log = Arc::default();
    let mut stack = MiddlewareStack::default();
    let l = Arc::clone(&log);
    stack.add(
        Direction::Response,
        on_response(move |_req, _res| {
            push(&l, "outer");
            Ok(())
        }),
    );
    stack.add(
        Direction::Response,
        on_response(|_req, _res| Err(Error::invalid_usage("rejected late"))),
    );
    let d = Dispatcher::new(
        router_with("/hello", logging_handler(&log)),
        stack,
        Signals::default(),
        ErrorHandler::default(),
    );
    let mut req = Request::new(Method::GET, "/hello");
    let res = d.dispatch(&mut req, None);
    assert_eq!(res.status(), 400);
    assert_eq!(body(&res), "Error: rejected late");
    assert_eq!(*log.lock().unwrap(), vec!["handler"]);
}

#[test]
fn test_prepare_reports_streaming_routes() {
    let mut router = Router::new();
    router
        .register(
            &[Method::POST],
            "/upload",
            Arc::new(|_req| Ok(Response::empty())),
            RouteOptions::default().streaming(),
        )
        .unwrap();
    let d = Dispatcher::new(
        router,
        MiddlewareStack::default(),
        Signals::default(),
        ErrorHandler::default(),
    );

    let mut req = Request::new(Method::POST, "/upload");
    assert!(d.prepare(&mut req));
    assert!(req.resolution.is_some());
    assert_eq!(d.dispatch(&mut req, None).status(), 204);

    let mut req = Request::new(Method::GET, "/upload");
    assert!(!d.prepare(&mut req));
    assert_eq!(d.dispatch(&mut req, None).status(), 405);
}

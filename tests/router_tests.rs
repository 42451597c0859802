use http::Method;
use machwire::dispatcher::Handler;
use machwire::router::ParamValue;
use machwire::{ErrorKind, Response, RouteOptions, Router};
use std::sync::Arc;

fn handler() -> Handler {
    Arc::new(|_req| Ok(Response::text("ok")))
}

/// A routing table shaped like a small REST API.
fn api_router() -> Router {
    let table: &[(&[Method], &str, Option<&str>)] = &[
        (&[Method::GET], "/", Some("index")),
        (&[Method::GET], "/health", None),
        (&[Method::GET, Method::POST], "/pets", Some("pets")),
        (&[Method::GET, Method::PUT, Method::DELETE], "/pets/{id:int}", Some("pet")),
        (&[Method::GET], "/pets/search", None),
        (&[Method::GET], "/pets/{id:int}/photos/{photo:[a-f0-9]{8}}", Some("photo")),
        (&[Method::GET], "/users/{username:alpha}", None),
        (&[Method::GET], "/users/{user_id:int}/posts/{post_id}", None),
        (&[Method::GET], "/prices/{amount:number}", None),
        (&[Method::GET], "/static/{file:path}", Some("static")),
    ];
    let mut router = Router::new();
    for (methods, pattern, name) in table {
        let options = name.map(RouteOptions::named).unwrap_or_default();
        router.register(methods, pattern, handler(), options).unwrap();
    }
    router
}

#[test]
fn test_route_table_matching() {
    let router = api_router();
    let cases = [
        (Method::GET, "/", "/"),
        (Method::GET, "/health", "/health"),
        (Method::POST, "/pets", "/pets"),
        (Method::GET, "/pets/12", "/pets/{id:int}"),
        (Method::DELETE, "/pets/12", "/pets/{id:int}"),
        (Method::GET, "/pets/search", "/pets/search"),
        (Method::GET, "/pets/12/photos/deadbeef", "/pets/{id:int}/photos/{photo:[a-f0-9]{8}}"),
        (Method::GET, "/users/alice", "/users/{username:alpha}"),
        (Method::GET, "/users/7/posts/hello", "/users/{user_id:int}/posts/{post_id}"),
        (Method::GET, "/prices/-2.5", "/prices/{amount:number}"),
        (Method::GET, "/static/css/site.css", "/static/{file:path}"),
    ];
    for (method, path, expected) in cases {
        let m = router
            .resolve(&method, path)
            .unwrap_or_else(|e| panic!("{method} {path}: {e}"));
        assert_eq!(m.route.pattern().as_str(), expected, "{method} {path}");
    }
}

#[test]
fn test_route_table_misses() {
    let router = api_router();
    for path in [
        "/pets/abc",
        "/pets/12/photos/xyz",
        "/pets/12/photos/DEADBEEF",
        "/users/alice99",
        "/prices/1.2.3",
        "/static",
        "/nothing/here",
    ] {
        let err = router.resolve(&Method::GET, path).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound, "{path}");
        assert_eq!(err.status(), 404);
    }

    let err = router.resolve(&Method::PATCH, "/pets/1").unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::MethodNotAllowed);
    assert_eq!(err.status(), 405);
    assert_eq!(
        err.allowed_methods(),
        &[Method::GET, Method::PUT, Method::DELETE]
    );
}

#[test]
fn test_params_are_typed() {
    let router = api_router();
    let m = router.resolve(&Method::GET, "/users/7/posts/first%20post").unwrap();
    assert_eq!(m.param("user_id"), Some(&ParamValue::Int(7)));
    assert_eq!(m.param("post_id").and_then(ParamValue::as_str), Some("first post"));

    let m = router.resolve(&Method::GET, "/prices/-2.5").unwrap();
    assert_eq!(m.param("amount").and_then(ParamValue::as_f64), Some(-2.5));

    let m = router.resolve(&Method::GET, "/static/a/b/c.js").unwrap();
    assert_eq!(m.param("file").and_then(ParamValue::as_str), Some("a/b/c.js"));
}

#[test]
fn test_reverse_routing_round_trips() {
    let router = api_router();
    let url = router.url_for("photo", &[("id", "3"), ("photo", "0badcafe")]).unwrap();
    assert_eq!(url, "/pets/3/photos/0badcafe");
    let m = router.resolve(&Method::GET, &url).unwrap();
    assert_eq!(m.route.name(), Some("photo"));

    let err = router.url_for("photo", &[("id", "3"), ("photo", "nothex!!")]).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UrlBuild);

    assert_eq!(
        router.url_for("pets", &[("page", "2")]).unwrap(),
        "/pets?page=2"
    );
}

#[test]
fn test_invalid_patterns_rejected() {
    let mut router = Router::new();
    for pattern in ["pets", "/pets/{id", "/x/{tail:path}/more", "/bad/{re:[unclosed}"] {
        let err = router
            .register(&[Method::GET], pattern, handler(), RouteOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidRoute, "{pattern}");
    }
    assert!(router.routes().is_empty());
}

//! Demo application served by `machwire serve`.

use bytes::Bytes;
use http::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::middleware::{MetricsMiddleware, TracingMiddleware};
use crate::router::RouteOptions;
use crate::server::{Cookie, Request, Response};

const USERS: &[&str] = &["ada", "grace", "linus", "barbara"];

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

fn user(req: &mut Request) -> Result<Response, Error> {
    let id = req.param("id").and_then(|v| v.as_i64()).unwrap_or(-1);
    let name = usize::try_from(id)
        .ok()
        .and_then(|i| USERS.get(i))
        .ok_or_else(|| Error::not_found(req.path()))?;
    Response::json(&json!({ "id": id, "name": name }))
}

fn echo(req: &mut Request) -> Result<Response, Error> {
    let content_type = req.content_type().to_string();
    let body = req.body()?.clone();
    Response::raw(body, &content_type)
}

fn greet(req: &mut Request) -> Result<Response, Error> {
    let greeting: Greeting = req.json()?;
    Response::json(&json!({ "message": format!("hello {}", greeting.name) }))
}

fn upload(req: &mut Request) -> Result<Response, Error> {
    let (mut bytes, mut chunks) = (0usize, 0usize);
    for chunk in req.take_stream()? {
        bytes += chunk?.len();
        chunks += 1;
    }
    Response::json(&json!({ "bytes": bytes, "chunks": chunks }))
}

fn login(req: &mut Request) -> Result<Response, Error> {
    let form = req.form_data()?;
    let name = form
        .field("user")
        .filter(|n| USERS.contains(n))
        .ok_or_else(|| Error::invalid_usage("unknown user"))?;
    let mut res = Response::redirect("/")?;
    res.add_cookie(Cookie::new("user", name)?.max_age(3600).http_only())?;
    Ok(res)
}

fn logout(_req: &mut Request) -> Result<Response, Error> {
    let mut res = Response::redirect("/")?;
    res.delete_cookie("user")?;
    Ok(res)
}

fn attachments(req: &mut Request) -> Result<Response, Error> {
    let files: Vec<_> = req
        .files()?
        .iter()
        .map(|f| json!({ "field": f.field, "name": f.file_name, "bytes": f.body.len() }))
        .collect();
    Response::json(&json!({ "files": files }))
}

fn countdown(req: &mut Request) -> Result<Response, Error> {
    let count = req.param("count").and_then(|v| v.as_i64()).unwrap_or(0).clamp(0, 1000);
    let lines = (1..=count)
        .rev()
        .map(|n| Ok(Bytes::from(format!("{n}\n"))));
    Response::stream(lines, "text/plain; charset=utf-8")
}

/// Build the demo application on top of `config`.
pub fn app(config: ServerConfig) -> Result<Arc<App>, Error> {
    let metrics = Arc::new(MetricsMiddleware::new());
    let snapshot_source = Arc::clone(&metrics);

    App::builder()
        .config(config)
        .wrap(Arc::new(TracingMiddleware))
        .wrap(metrics)
        .get("/", |_req| Ok(Response::text("machwire")))
        .get("/hello/{name:alpha}", |req| {
            let name = req.param("name").map(ToString::to_string).unwrap_or_default();
            Ok(Response::text(format!("hello {name}")))
        })
        .route(&[Method::GET], "/users/{id:int}", RouteOptions::named("user"), user)
        .get("/files/{path:path}", |req| {
            let path = req.param("path").map(ToString::to_string).unwrap_or_default();
            Ok(Response::text(path))
        })
        .post("/echo", echo)
        .post("/greet", greet)
        .route(&[Method::POST, Method::PUT], "/upload", RouteOptions::default().streaming(), upload)
        .post("/login", login)
        .post("/logout", logout)
        .post("/attachments", attachments)
        .get("/countdown/{count:int}", countdown)
        .get("/metrics", move |_req| Response::json(&snapshot_source.snapshot()))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::body_channel;

    fn body(res: &Response) -> String {
        String::from_utf8(res.body_bytes().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_demo_routes() {
        let app = app(ServerConfig::default()).unwrap();

        let res = app.handle(&mut Request::new(Method::GET, "/users/1"));
        assert_eq!(res.status(), 200);
        let v: serde_json::Value = serde_json::from_str(&body(&res)).unwrap();
        assert_eq!(v["name"], "grace");

        let res = app.handle(&mut Request::new(Method::GET, "/users/99"));
        assert_eq!(res.status(), 404);

        let res = app.handle(&mut Request::new(Method::GET, "/users/abc"));
        assert_eq!(res.status(), 404);

        let res = app.handle(&mut Request::new(Method::GET, "/files/a/b/c.txt"));
        assert_eq!(body(&res), "a/b/c.txt");

        let res = app.handle(&mut Request::new(Method::DELETE, "/echo"));
        assert_eq!(res.status(), 405);
    }

    #[test]
    fn test_greet_rejects_bad_json() {
        let app = app(ServerConfig::default()).unwrap();
        let mut req = Request::new(Method::POST, "/greet").with_body("{not json");
        assert_eq!(app.handle(&mut req).status(), 400);

        let mut req = Request::new(Method::POST, "/greet").with_body(r#"{"name":"bob"}"#);
        assert!(body(&app.handle(&mut req)).contains("hello bob"));
    }

    #[test]
    fn test_upload_counts_stream() {
        let app = app(ServerConfig::default()).unwrap();
        let (tx, rx) = body_channel();
        assert!(tx.send(Bytes::from_static(b"abc")));
        assert!(tx.send(Bytes::from_static(b"de")));
        drop(tx);
        let mut req = Request::new(Method::POST, "/upload").with_stream(rx);
        let res = app.handle(&mut req);
        let v: serde_json::Value = serde_json::from_str(&body(&res)).unwrap();
        assert_eq!(v["bytes"], 5);
        assert_eq!(v["chunks"], 2);
    }

    #[test]
    fn test_metrics_counts_requests() {
        let app = app(ServerConfig::default()).unwrap();
        app.handle(&mut Request::new(Method::GET, "/"));
        let res = app.handle(&mut Request::new(Method::GET, "/metrics"));
        let v: serde_json::Value = serde_json::from_str(&body(&res)).unwrap();
        assert_eq!(v["requests"], 2);
        assert_eq!(v["responses_2xx"], 1);
    }

    #[test]
    fn test_login_sets_and_logout_clears_cookie() {
        let app = app(ServerConfig::default()).unwrap();
        let mut req = Request::new(Method::POST, "/login")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("user=ada");
        let res = app.handle(&mut req);
        assert_eq!(res.status(), 302);
        assert_eq!(res.header("set-cookie"), Some("user=ada; Path=/; Max-Age=3600; HttpOnly"));

        let mut req = Request::new(Method::POST, "/login").with_body("user=mallory");
        assert_eq!(app.handle(&mut req).status(), 400);

        let res = app.handle(&mut Request::new(Method::POST, "/logout"));
        assert!(res.header("set-cookie").unwrap().starts_with("user=; Path=/; Max-Age=0"));
    }

    #[test]
    fn test_attachments_lists_uploaded_files() {
        let app = app(ServerConfig::default()).unwrap();
        let raw = "--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.txt\"\r\n\r\n\
                   hello\r\n--b--\r\n";
        let mut req = Request::new(Method::POST, "/attachments")
            .with_header("Content-Type", "multipart/form-data; boundary=b")
            .with_body(raw);
        let res = app.handle(&mut req);
        let v: serde_json::Value = serde_json::from_str(&body(&res)).unwrap();
        assert_eq!(v["files"][0]["name"], "x.txt");
        assert_eq!(v["files"][0]["bytes"], 5);
    }
}

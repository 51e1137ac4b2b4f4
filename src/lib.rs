use std::sync::Arc;

use axum::{middleware, Router};

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod http;
pub mod logging;
pub mod registry;
pub mod status;

use dispatcher::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Every path is routed to the dispatcher, which matches endpoints exactly.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .fallback(http::handlers::dispatch_endpoint)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::{
        aggregator::{ResponseHandle, MARKUP_CONTENT_TYPE, STATUS_MESSAGE_HEADER},
        http::handlers::register_builtin,
        registry::{handler_fn, EndpointRegistry},
    };

    use super::*;

    fn app() -> Router {
        let mut registry = EndpointRegistry::new();
        for _ in 0..2 {
            registry.register(
                "/ping",
                handler_fn(|_request, response: ResponseHandle| async move {
                    response.send(&json!({"ok": true}));
                    response.done();
                }),
            );
        }
        registry
            .register(
                "/fail",
                handler_fn(|_request, response: ResponseHandle| async move {
                    response.add_error("boom", 503);
                    response.done();
                }),
            )
            .register(
                "/html",
                handler_fn(|_request, response: ResponseHandle| async move {
                    response.set_raw_body("<p>hi</p>");
                    response.done();
                }),
            )
            .register(
                "/echo",
                handler_fn(|request, response: ResponseHandle| async move {
                    response.send(&json!({
                        "method": request.method.as_str(),
                        "query": request.query,
                        "body": String::from_utf8_lossy(&request.body),
                    }));
                    response.add_header("x-handled-by", "echo");
                    response.set_status(202, "queued");
                    response.done();
                }),
            )
            .register(
                "/echo",
                handler_fn(|_request, response: ResponseHandle| async move {
                    response.add_header("x-handled-by", "audit");
                    response.done();
                }),
            );
        register_builtin(&mut registry);

        build_app(AppState::new(Dispatcher::new(
            registry,
            Duration::from_secs(5),
        )))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    #[tokio::test]
    async fn ping_merges_both_handlers() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[STATUS_MESSAGE_HEADER], "OK");
        assert_eq!(
            body_json(response).await,
            json!({
                "body": [{"ok": true}, {"ok": true}],
                "errors": [],
                "status_code": 200,
                "status_message": "OK",
            })
        );
    }

    #[tokio::test]
    async fn handler_error_becomes_response_status() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/fail")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[STATUS_MESSAGE_HEADER], "boom");
        let body_json = body_json(response).await;
        assert_eq!(body_json["errors"], json!([{"code": 503, "message": "boom"}]));
        assert_eq!(body_json["status_code"], 503);
        assert_eq!(body_json["body"], json!([]));
    }

    #[tokio::test]
    async fn raw_body_is_served_as_markup() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/html")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], MARKUP_CONTENT_TYPE);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(body, "<p>hi</p>");
    }

    #[tokio::test]
    async fn missing_endpoint_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/missing")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body_json = body_json(response).await;
        assert_eq!(body_json["code"], "endpoint_not_found");
        assert_eq!(body_json["details"]["endpoint"], "/missing");
    }

    #[tokio::test]
    async fn request_context_and_headers_reach_the_wire() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo?verbose=1")
                    .method("POST")
                    .body(Body::from("payload"))
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[STATUS_MESSAGE_HEADER], "Accepted - queued");
        let mut handled_by: Vec<String> = response
            .headers()
            .get_all("x-handled-by")
            .iter()
            .map(|value| value.to_str().expect("ascii header").to_string())
            .collect();
        handled_by.sort();
        assert_eq!(handled_by, vec!["audit", "echo"]);

        let body_json = body_json(response).await;
        assert_eq!(
            body_json["body"],
            json!([{"method": "POST", "query": "verbose=1", "body": "payload"}])
        );
    }

    #[tokio::test]
    async fn health_lists_registered_endpoints() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json = body_json(response).await;
        let items = body_json["body"].as_array().expect("body array");
        assert_eq!(items.len(), 2);

        let health = items
            .iter()
            .find(|item| item.get("status").is_some())
            .expect("health item");
        assert_eq!(health["status"], "ok");

        let discovery = items
            .iter()
            .find(|item| item.get("endpoints").is_some())
            .expect("discovery item");
        assert_eq!(discovery["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(discovery["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(
            discovery["endpoints"],
            json!(["/echo", "/fail", "/health", "/html", "/ping"])
        );
    }
}

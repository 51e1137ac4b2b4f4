//! Axum glue and built-in endpoint handlers
//!
//! Every inbound request is handed to the dispatcher by exact path. The
//! built-in `/health` endpoint is itself served by two fan-out handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
};
use serde::Serialize;
use tracing::debug;

use crate::{
    aggregator::{FinalResponse, ResponseHandle},
    errors::AppError,
    registry::{handler_fn, EndpointRegistry, RequestContext},
    AppState,
};

pub const HEALTH_ENDPOINT: &str = "/health";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<String>,
}

pub async fn dispatch_endpoint(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<FinalResponse, AppError> {
    debug!(method = %method, uri = %uri, "processing request");

    let request = RequestContext {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    };

    state.dispatcher.dispatch(request).await
}

pub async fn health(_request: Arc<RequestContext>, response: ResponseHandle) {
    response.send(&HealthResponse { status: "ok" });
    response.done();
}

/// Registers `/health`. Call after all other endpoints are registered so the
/// discovery handler lists them.
pub fn register_builtin(registry: &mut EndpointRegistry) {
    let mut endpoints: Vec<String> = registry
        .endpoints()
        .into_iter()
        .map(|(endpoint, _)| endpoint.to_string())
        .filter(|endpoint| endpoint != HEALTH_ENDPOINT)
        .collect();
    endpoints.push(HEALTH_ENDPOINT.to_string());
    endpoints.sort();
    let endpoints: Arc<[String]> = Arc::from(endpoints);

    registry.register(HEALTH_ENDPOINT, handler_fn(health)).register(
        HEALTH_ENDPOINT,
        handler_fn(move |_request, response: ResponseHandle| {
            let endpoints = endpoints.clone();
            async move {
                response.send(&DiscoveryResponse {
                    name: env!("CARGO_PKG_NAME"),
                    version: env!("CARGO_PKG_VERSION"),
                    endpoints: endpoints.to_vec(),
                });
                response.done();
            }
        }),
    );
}

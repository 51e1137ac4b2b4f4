//! Endpoint registration
//!
//! Maps an exact endpoint path to the ordered list of handlers that serve it.
//! The registry is populated before serving starts and only read afterwards.

use std::{collections::HashMap, future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method},
};

use crate::{aggregator::ResponseHandle, errors::AppError};

/// The inbound request as seen by every handler of an endpoint.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// One concurrently executed unit of work attached to an endpoint.
///
/// A handler reports through its [`ResponseHandle`]: zero or more
/// [`ResponseHandle::send`] calls and mutations, then exactly one
/// [`ResponseHandle::done`].
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Arc<RequestContext>, response: ResponseHandle);
}

pub struct FnHandler<F, Fut> {
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Adapts an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F, Fut>
where
    F: Fn(Arc<RequestContext>, ResponseHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnHandler {
        func,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Arc<RequestContext>, ResponseHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, request: Arc<RequestContext>, response: ResponseHandle) {
        (self.func)(request, response).await
    }
}

#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: Handler>(&mut self, endpoint: impl Into<String>, handler: H) -> &mut Self {
        self.register_arc(endpoint, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        endpoint: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        self.endpoints
            .entry(endpoint.into())
            .or_default()
            .push(handler);
        self
    }

    pub fn lookup(&self, endpoint: &str) -> Result<&[Arc<dyn Handler>], AppError> {
        self.endpoints
            .get(endpoint)
            .map(Vec::as_slice)
            .ok_or_else(|| AppError::endpoint_not_found(endpoint))
    }

    /// Registered endpoints with their handler counts, sorted by path.
    pub fn endpoints(&self) -> Vec<(&str, usize)> {
        let mut endpoints: Vec<(&str, usize)> = self
            .endpoints
            .iter()
            .map(|(endpoint, handlers)| (endpoint.as_str(), handlers.len()))
            .collect();
        endpoints.sort_by(|left, right| left.0.cmp(right.0));
        endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> impl Handler {
        handler_fn(|_request, response: ResponseHandle| async move { response.done() })
    }

    #[test]
    fn register_same_endpoint_twice_appends() {
        let mut registry = EndpointRegistry::new();
        registry.register("/ping", noop()).register("/ping", noop());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("/ping").expect("registered").len(), 2);
    }

    #[test]
    fn lookup_preserves_registration_order() {
        let first: Arc<dyn Handler> = Arc::new(noop());
        let second: Arc<dyn Handler> = Arc::new(noop());
        let mut registry = EndpointRegistry::new();
        registry
            .register_arc("/a", first.clone())
            .register_arc("/a", second.clone());

        let handlers = registry.lookup("/a").expect("registered");
        assert!(Arc::ptr_eq(&handlers[0], &first));
        assert!(Arc::ptr_eq(&handlers[1], &second));
    }

    #[test]
    fn lookup_unknown_endpoint_fails() {
        let mut registry = EndpointRegistry::new();
        registry.register("/ping", noop());

        let err = registry.lookup("/missing").err().expect("expected lookup failure");
        assert!(matches!(err, AppError::EndpointNotFound { ref endpoint } if endpoint == "/missing"));
    }

    #[test]
    fn lookup_is_exact_match() {
        let mut registry = EndpointRegistry::new();
        registry.register("/ping", noop());

        assert!(registry.lookup("/ping/").is_err());
        assert!(registry.lookup("/PING").is_err());
    }

    #[test]
    fn endpoints_are_sorted_with_counts() {
        let mut registry = EndpointRegistry::new();
        registry
            .register("/b", noop())
            .register("/a", noop())
            .register("/b", noop());

        assert_eq!(registry.endpoints(), vec![("/a", 1), ("/b", 2)]);
    }
}

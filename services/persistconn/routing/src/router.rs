//! Handler capability and routing decisions

use async_trait::async_trait;
use pconn_wire::{Request, Response};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A request handler.
///
/// Returning `Err` is not fatal: the engine turns the error into a 500
/// response whose body is the error message.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request
    async fn handle(&self, request: Request) -> anyhow::Result<Response>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    async fn handle(&self, request: Request) -> anyhow::Result<Response> {
        (self)(request).await
    }
}

/// Built-in handler for requests no route accepts
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

#[async_trait]
impl Handler for NotFoundHandler {
    async fn handle(&self, _request: Request) -> anyhow::Result<Response> {
        Ok(Response::not_found())
    }
}

/// Outcome of matching a request against the routing table
#[derive(Clone)]
pub enum RoutingDecision {
    /// A registered route accepted the request
    Matched {
        /// Position of the route in registration order
        index: usize,
        /// Route handler
        handler: Arc<dyn Handler>,
        /// Parameters bound by named segments
        params: HashMap<String, String>,
    },
    /// No route accepted the request
    NotFound,
}

impl RoutingDecision {
    /// Whether a registered route matched
    pub fn is_matched(&self) -> bool {
        matches!(self, RoutingDecision::Matched { .. })
    }

    /// Write bound parameters into the request and return the handler to run
    pub fn bind(self, request: &mut Request) -> Arc<dyn Handler> {
        match self {
            RoutingDecision::Matched {
                handler, params, ..
            } => {
                request.params.extend(params);
                handler
            }
            RoutingDecision::NotFound => Arc::new(NotFoundHandler),
        }
    }
}

impl fmt::Debug for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingDecision::Matched { index, params, .. } => f
                .debug_struct("Matched")
                .field("index", index)
                .field("params", params)
                .finish_non_exhaustive(),
            RoutingDecision::NotFound => write!(f, "NotFound"),
        }
    }
}

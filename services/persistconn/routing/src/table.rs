//! Ordered routing table

use crate::pattern::{PathPattern, RouteConfigError};
use crate::router::{Handler, RoutingDecision};
use pconn_wire::Request;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A registered (pattern, handler, methods) triple
#[derive(Clone)]
pub(crate) struct Route {
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
    /// Upper-cased
    methods: BTreeSet<String>,
}

impl Route {
    /// Method comparison ignores ASCII case
    fn accepts_method(&self, method: &str) -> bool {
        self.methods.contains(&method.to_ascii_uppercase())
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Routes in registration order.
///
/// Matching is strictly first-registered-first-tried; there is no
/// specificity ranking, and a duplicate pattern is kept but never reached.
#[derive(Debug, Default, Clone)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    /// Create an empty routing table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a pattern and a set of methods
    pub fn register<H, I, M>(
        &mut self,
        pattern: &str,
        handler: H,
        methods: I,
    ) -> Result<(), RouteConfigError>
    where
        H: Handler + 'static,
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        self.register_shared(pattern, Arc::new(handler), methods)
    }

    /// Register an already shared handler
    pub fn register_shared<I, M>(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        methods: I,
    ) -> Result<(), RouteConfigError>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        let pattern = PathPattern::compile(pattern)?;
        let methods: BTreeSet<String> = methods
            .into_iter()
            .map(|m| m.as_ref().trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();

        if methods.is_empty() {
            return Err(RouteConfigError::NoMethods {
                pattern: pattern.as_str().to_string(),
            });
        }

        info!(component = "router", "Registered route {} for {:?}", pattern, methods);
        self.routes.push(Route {
            pattern,
            handler,
            methods,
        });
        Ok(())
    }

    /// Find the first route accepting the request's path and method
    pub fn decide(&self, request: &Request) -> RoutingDecision {
        for (index, route) in self.routes.iter().enumerate() {
            if !route.accepts_method(&request.method) {
                continue;
            }
            if let Some(params) = route.pattern.matches(&request.path) {
                debug!(
                    component = "router",
                    "Matched {} {} to route #{} ({})",
                    request.method, request.path, index, route.pattern
                );
                return RoutingDecision::Matched {
                    index,
                    handler: route.handler.clone(),
                    params,
                };
            }
        }

        debug!(component = "router", "No route for {} {}", request.method, request.path);
        RoutingDecision::NotFound
    }

    /// Match, bind parameters into the request, and return the handler to run
    pub fn resolve(&self, request: &mut Request) -> Arc<dyn Handler> {
        self.decide(request).bind(request)
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

//! Per-frame dispatch: slot reservation, routing and handler tasks

use crate::config::{EngineConfig, InitBlockMode};
use crate::sequencer::{Sequencer, SlotTicket};
use futures::FutureExt;
use pconn_routing::{Handler, RoutingTable};
use pconn_wire::{Frame, Outbound, Request, Response, TIMEOUT_BODY};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Body of the 500 produced when a handler panics
pub const PANIC_BODY: &str = "handler panicked";

/// Turns decoded frames into ordered slots and spawned handler tasks
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RoutingTable>,
    sequencer: Sequencer,
    limiter: Option<Arc<Semaphore>>,
    handler_timeout: Option<Duration>,
    init_block_mode: InitBlockMode,
}

impl Dispatcher {
    /// Create a dispatcher over a frozen routing table
    pub fn new(routes: Arc<RoutingTable>, sequencer: Sequencer, config: &EngineConfig) -> Self {
        Self {
            routes,
            sequencer,
            // 0 means unbounded, wherever the setting came from
            limiter: config
                .max_concurrency
                .filter(|&permits| permits > 0)
                .map(|permits| Arc::new(Semaphore::new(permits))),
            handler_timeout: config.handler_timeout,
            init_block_mode: config.init_block_mode,
        }
    }

    /// Handle one decoded frame.
    ///
    /// Reserves every slot the frame needs before returning, so calling this
    /// in arrival order fixes the output order. Handler work runs on spawned
    /// tasks and never blocks the caller.
    pub fn dispatch_frame(&self, frame: Frame) {
        let opcode = frame.opcode;
        let acknowledge = opcode.is_init()
            && !(opcode.has_block() && self.init_block_mode == InitBlockMode::FirstRequest);

        if acknowledge {
            debug!(
                component = "dispatcher",
                command = ?frame.command,
                "Acknowledging init frame"
            );
            self.sequencer.push_ready(Outbound::InitAck);
        }

        if opcode.has_block() {
            match Request::from_frame(&frame) {
                Ok(request) => self.submit(request),
                Err(e) => {
                    warn!(component = "dispatcher", "Rejecting malformed request: {}", e);
                    self.sequencer.push_ready(Response::bad_request(e.to_string()));
                }
            }
        } else if !opcode.is_init() {
            debug!(
                component = "dispatcher",
                opcode = opcode.to_byte(),
                "Frame carries no init or block; nothing to answer"
            );
        }
    }

    /// Reserve a slot for a normalized request and run its handler
    pub fn submit(&self, mut request: Request) {
        let ticket = self.sequencer.reserve();
        let handler = self.routes.resolve(&mut request);
        debug!(
            component = "dispatcher",
            slot = ticket.id().0,
            method = %request.method,
            path = %request.path,
            "Dispatching request"
        );

        let limiter = self.limiter.clone();
        let timeout = self.handler_timeout;
        tokio::spawn(execute(ticket, handler, request, limiter, timeout));
    }
}

async fn execute(
    ticket: SlotTicket,
    handler: Arc<dyn Handler>,
    request: Request,
    limiter: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
) {
    // Held until the handler finishes
    let _permit = match limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    let slot = ticket.id().0;
    let response = run_handler(handler, request, timeout).await;
    debug!(
        component = "dispatcher",
        slot,
        status = response.status_code,
        "Handler finished"
    );
    ticket.complete(response);
}

/// Run a handler to a response; failures, panics and timeouts become error responses
pub async fn run_handler(
    handler: Arc<dyn Handler>,
    request: Request,
    timeout: Option<Duration>,
) -> Response {
    let call = AssertUnwindSafe(handler.handle(request)).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(component = "dispatcher", "Handler exceeded {:?}", limit);
                return Response::gateway_timeout();
            }
        },
        None => call.await,
    };

    match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(component = "dispatcher", "Handler failed: {:#}", e);
            Response::internal_error(e.to_string())
        }
        Err(_) => {
            warn!(component = "dispatcher", "Handler panicked");
            Response::internal_error(PANIC_BODY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pconn_routing::NotFoundHandler;

    fn handler<F, Fut>(f: F) -> Arc<dyn Handler>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Response>> + Send + 'static,
    {
        Arc::new(f)
    }

    fn dispatcher(config: &EngineConfig) -> Dispatcher {
        let (sequencer, _flusher) = crate::sequencer::channel();
        Dispatcher::new(Arc::new(RoutingTable::new()), sequencer, config)
    }

    #[test]
    fn test_zero_concurrency_is_unbounded() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_concurrency": 0}"#).unwrap();
        assert!(dispatcher(&config).limiter.is_none());

        let config: EngineConfig = serde_json::from_str(r#"{"max_concurrency": 3}"#).unwrap();
        let limiter = dispatcher(&config).limiter.unwrap();
        assert_eq!(limiter.available_permits(), 3);

        assert!(dispatcher(&EngineConfig::default()).limiter.is_none());
    }

    #[tokio::test]
    async fn test_run_handler_success() {
        let h = handler(|req: Request| async move { Ok(Response::ok(req.path)) });
        let request = Request {
            path: "a/b".to_string(),
            ..Default::default()
        };
        assert_eq!(run_handler(h, request, None).await, Response::ok("a/b"));
    }

    #[tokio::test]
    async fn test_run_handler_error_becomes_500() {
        let h = handler(|_req: Request| async move { Err(anyhow::anyhow!("db down")) });
        let response = run_handler(h, Request::default(), None).await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body, "db down");
    }

    #[tokio::test]
    async fn test_run_handler_panic_becomes_500() {
        let h = handler(|_req: Request| async move {
            if true {
                panic!("boom");
            }
            Ok(Response::ok("unreachable"))
        });
        let response = run_handler(h, Request::default(), None).await;
        assert_eq!(response, Response::internal_error(PANIC_BODY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_handler_timeout_becomes_504() {
        let h = handler(|_req: Request| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Response::ok("late"))
        });
        let response = run_handler(h, Request::default(), Some(Duration::from_secs(1))).await;
        assert_eq!(response.status_code, 504);
        assert_eq!(response.body, TIMEOUT_BODY);
    }

    #[tokio::test]
    async fn test_not_found_handler_passes_through() {
        let response = run_handler(Arc::new(NotFoundHandler), Request::default(), None).await;
        assert_eq!(response, Response::not_found());
    }
}

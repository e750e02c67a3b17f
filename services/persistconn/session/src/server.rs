//! Registration API and the main read loop

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::sequencer;
use pconn_routing::{Handler, RouteConfigError, RoutingTable};
use pconn_wire::FrameDecoder;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, error, info};

/// Counters reported when a connection ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Frames decoded from the input stream
    pub frames: u64,
    /// Outbound units written (responses and init acknowledgments)
    pub written: u64,
}

/// A persistent-connection engine.
///
/// Routes are registered up front; [`Server::run`] then consumes the server,
/// freezing the routing table for the life of the connection.
#[derive(Debug, Default)]
pub struct Server {
    routes: RoutingTable,
    config: EngineConfig,
}

impl Server {
    /// Create a server with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server with the given configuration
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            routes: RoutingTable::new(),
            config,
        }
    }

    /// Register a handler for `pattern` and `methods`
    pub fn register<H, I, M>(
        &mut self,
        pattern: &str,
        handler: H,
        methods: I,
    ) -> Result<&mut Self, RouteConfigError>
    where
        H: Handler + 'static,
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        self.routes.register(pattern, handler, methods)?;
        Ok(self)
    }

    /// Registered routes
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Serve the process's stdin and stdout until the host closes stdin
    pub async fn run_stdio(self) -> Result<ServeStats, ServerError> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection.
    ///
    /// Frames are read strictly one at a time. On a clean end of input the
    /// loop stops, in-flight handlers finish, and every remaining slot is
    /// written in order before this returns. A decode error ends the
    /// connection immediately.
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<ServeStats, ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Server { routes, config } = self;
        info!(
            component = "server",
            routes = routes.len(),
            "Starting persistent connection engine"
        );

        let (sequencer, flusher) = sequencer::channel();
        let mut flush_task = tokio::spawn(flusher.run(writer));
        let dispatcher = Dispatcher::new(Arc::new(routes), sequencer, &config);

        let mut decoder =
            FrameDecoder::new(BufReader::new(reader)).with_max_string_len(config.max_string_len);
        let mut frames = 0u64;

        loop {
            tokio::select! {
                read = decoder.read_frame() => match read {
                    Ok(Some(frame)) => {
                        frames += 1;
                        debug!(
                            component = "server",
                            frame = frames,
                            opcode = frame.opcode.to_byte(),
                            "Read frame"
                        );
                        dispatcher.dispatch_frame(frame);
                    }
                    Ok(None) => {
                        info!(component = "server", frames, "Input closed; draining in-flight requests");
                        break;
                    }
                    Err(e) => {
                        error!(component = "server", frames, "Fatal input error: {}", e);
                        flush_task.abort();
                        return Err(ServerError::Wire(e));
                    }
                },
                joined = &mut flush_task => {
                    let err = match joined {
                        Ok(Err(e)) => e,
                        Ok(Ok(_)) => ServerError::Flusher("flusher exited while input was open".to_string()),
                        Err(e) => ServerError::Flusher(e.to_string()),
                    };
                    error!(component = "server", frames, "Output failed: {}", err);
                    return Err(err);
                }
            }
        }

        // Tickets held by running handlers keep the flusher alive until they complete
        drop(dispatcher);
        let written = match flush_task.await {
            Ok(result) => result?,
            Err(e) => return Err(ServerError::Flusher(e.to_string())),
        };

        let stats = ServeStats { frames, written };
        info!(
            component = "server",
            frames = stats.frames,
            written = stats.written,
            "Connection finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitBlockMode;
    use pconn_wire::{
        Command, Frame, Opcode, Outbound, OutboundReader, Request, Response, WireError,
        NOT_FOUND_BODY, TIMEOUT_BODY,
    };
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn block(method: &str, path: &str) -> Frame {
        let document = serde_json::json!({ "method": method, "path_info": path });
        Frame::block(document.to_string())
    }

    fn init_frame() -> Frame {
        Frame::init(Command {
            parts: vec!["persistconn".to_string(), "app".to_string()],
            arg: String::new(),
        })
    }

    fn input(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode().to_vec()).collect()
    }

    /// Run `server` over in-memory pipes and collect everything it writes
    async fn serve(server: Server, bytes: Vec<u8>) -> (Result<ServeStats, ServerError>, Vec<Outbound>) {
        let (mut host_in, engine_in) = tokio::io::duplex(64 * 1024);
        let (engine_out, host_out) = tokio::io::duplex(64 * 1024);

        let engine = tokio::spawn(server.run(engine_in, engine_out));
        let collector = tokio::spawn(async move {
            OutboundReader::new(tokio::io::BufReader::new(host_out))
                .read_all()
                .await
        });

        // The engine may stop reading early on fatal input
        let _ = host_in.write_all(&bytes).await;
        let _ = host_in.shutdown().await;
        drop(host_in);

        let result = engine.await.unwrap();
        let outputs = collector.await.unwrap().unwrap_or_default();
        (result, outputs)
    }

    fn response(outbound: &Outbound) -> &Response {
        match outbound {
            Outbound::Response(response) => response,
            Outbound::InitAck => panic!("expected a response, got an init ack"),
        }
    }

    fn sleeper() -> impl Handler {
        |req: Request| async move {
            let delay: u64 = req.param("delay").unwrap_or("0").parse()?;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, anyhow::Error>(Response::ok(req.param("seq").unwrap_or_default().to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_output_order_matches_submission_order() {
        let mut server = Server::new();
        server.register("work/:seq/:delay", sleeper(), ["GET"]).unwrap();

        let count = 60;
        let frames: Vec<Frame> = {
            let mut rng = rand::thread_rng();
            (0..count)
                .map(|seq| {
                    let delay: u64 = rng.gen_range(0..40);
                    block("GET", &format!("work/{}/{}", seq, delay))
                })
                .collect()
        };

        let (result, outputs) = serve(server, input(&frames)).await;
        let stats = result.unwrap();
        assert_eq!(stats.frames, count);
        assert_eq!(stats.written, count);

        let bodies: Vec<String> = outputs.iter().map(|o| response(o).body.clone()).collect();
        let expected: Vec<String> = (0..count).map(|seq| seq.to_string()).collect();
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_its_position() {
        let mut server = Server::new();
        server
            .register("work/:seq/:delay", sleeper(), ["GET"])
            .unwrap()
            .register(
                "fail",
                |_req: Request| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<Response, _>(anyhow::anyhow!("storage unavailable"))
                },
                ["GET"],
            )
            .unwrap();

        let frames = [
            block("GET", "work/0/30"),
            block("GET", "fail"),
            block("GET", "work/2/0"),
            block("GET", "missing"),
        ];
        let (result, outputs) = serve(server, input(&frames)).await;
        result.unwrap();

        let got: Vec<(u16, &str)> = outputs
            .iter()
            .map(|o| (response(o).status_code, response(o).body.as_str()))
            .collect();
        assert_eq!(
            got,
            [
                (200, "0"),
                (500, "storage unavailable"),
                (200, "2"),
                (404, NOT_FOUND_BODY)
            ]
        );
    }

    #[tokio::test]
    async fn test_init_ack_is_ordered_with_responses() {
        let mut server = Server::new();
        server.register("work/:seq/:delay", sleeper(), ["GET"]).unwrap();

        let frames = [block("GET", "work/0/30"), init_frame(), block("GET", "work/2/0")];
        let (result, outputs) = serve(server, input(&frames)).await;
        result.unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(response(&outputs[0]).body, "0");
        assert_eq!(outputs[1], Outbound::InitAck);
        assert_eq!(response(&outputs[2]).body, "2");
    }

    #[tokio::test]
    async fn test_init_with_block_modes() {
        let combined = init_frame().with_block(
            serde_json::json!({ "method": "GET", "path_info": "work/1/0" }).to_string(),
        );

        let mut separate = Server::new();
        separate.register("work/:seq/:delay", sleeper(), ["GET"]).unwrap();
        let (result, outputs) = serve(separate, input(&[combined.clone()])).await;
        result.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], Outbound::InitAck);
        assert_eq!(response(&outputs[1]).body, "1");

        let mut first_request = Server::with_config(EngineConfig {
            init_block_mode: InitBlockMode::FirstRequest,
            ..Default::default()
        });
        first_request
            .register("work/:seq/:delay", sleeper(), ["GET"])
            .unwrap();
        let (result, outputs) = serve(first_request, input(&[combined])).await;
        result.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(response(&outputs[0]).body, "1");
    }

    #[tokio::test]
    async fn test_malformed_document_fails_only_that_request() {
        let mut server = Server::new();
        server.register("work/:seq/:delay", sleeper(), ["GET"]).unwrap();

        let frames = [
            block("GET", "work/0/10"),
            Frame::block("{not json"),
            block("GET", "work/2/0"),
        ];
        let (result, outputs) = serve(server, input(&frames)).await;
        result.unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(response(&outputs[0]).body, "0");
        assert_eq!(response(&outputs[1]).status_code, 400);
        assert_eq!(response(&outputs[2]).body, "2");
    }

    #[tokio::test]
    async fn test_end_only_frame_produces_nothing() {
        let server = Server::new();
        let frames = [Frame {
            opcode: Opcode::END,
            command: None,
            block: None,
        }];
        let (result, outputs) = serve(server, input(&frames)).await;
        assert_eq!(result.unwrap().frames, 1);
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_fatal() {
        let mut bytes = input(&[block("GET", "anything")]);
        bytes.extend_from_slice(b"\x02100\n{\"method\"");

        let (result, _outputs) = serve(Server::new(), bytes).await;
        assert!(matches!(
            result,
            Err(ServerError::Wire(WireError::TruncatedFrame))
        ));
    }

    #[tokio::test]
    async fn test_malformed_length_is_fatal() {
        let (result, _outputs) = serve(Server::new(), b"\x02abc\n".to_vec()).await;
        assert!(matches!(
            result,
            Err(ServerError::Wire(WireError::MalformedLength(_)))
        ));
    }

    #[tokio::test]
    async fn test_empty_input_is_clean() {
        let (result, outputs) = serve(Server::new(), Vec::new()).await;
        assert_eq!(result.unwrap(), ServeStats::default());
        assert!(outputs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_limit_bounds_running_handlers() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut server = Server::with_config(EngineConfig {
            max_concurrency: Some(2),
            ..Default::default()
        });
        let (r, p) = (running.clone(), peak.clone());
        server
            .register(
                "slow/:seq",
                move |req: Request| {
                    let (running, peak) = (r.clone(), p.clone());
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(Response::ok(req.param("seq").unwrap_or_default().to_string()))
                    }
                },
                ["GET"],
            )
            .unwrap();

        let frames: Vec<Frame> = (0..8).map(|i| block("GET", &format!("slow/{}", i))).collect();
        let (result, outputs) = serve(server, input(&frames)).await;
        result.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let bodies: Vec<&str> = outputs.iter().map(|o| response(o).body.as_str()).collect();
        assert_eq!(bodies, ["0", "1", "2", "3", "4", "5", "6", "7"]);
    }

    #[tokio::test]
    async fn test_handler_timeout_yields_504() {
        let mut server = Server::with_config(EngineConfig {
            handler_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        server.register("work/:seq/:delay", sleeper(), ["GET"]).unwrap();

        let frames = [block("GET", "work/0/5000"), block("GET", "work/1/0")];
        let (result, outputs) = serve(server, input(&frames)).await;
        result.unwrap();

        assert_eq!(response(&outputs[0]).status_code, 504);
        assert_eq!(response(&outputs[0]).body, TIMEOUT_BODY);
        assert_eq!(response(&outputs[1]).body, "1");
    }
}

//! persistconn binary.
//!
//! Runs the persistent-connection engine on stdin/stdout with the built-in
//! demo routes. Logs go to stderr; stdout carries protocol frames only.

use clap::Parser;
use pconn_session::{InitBlockMode, Server};
use std::path::PathBuf;
use tracing::{error, info, warn};

mod config;
mod handlers;
mod logging;

use config::{ConfigOrigin, PersistConnConfig, DEFAULT_CONFIG_FILE};

/// Persistent-connection request engine over stdin/stdout
#[derive(Parser, Debug)]
#[command(name = "persistconn", version, about = "Persistent-connection request engine over stdin/stdout")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// How INIT+BLOCK frames are answered: separate, first-request
    #[arg(long)]
    init_block_mode: Option<InitBlockMode>,

    /// Maximum handlers running at once (0 for unbounded)
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Per-handler deadline, e.g. 30s
    #[arg(long)]
    handler_timeout: Option<humantime::Duration>,

    /// Largest accepted length-prefixed string, in bytes
    #[arg(long)]
    max_string_len: Option<usize>,
}

impl Args {
    /// Command-line flags win over file and environment
    fn apply(&self, config: &mut PersistConnConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(mode) = self.init_block_mode {
            config.engine.init_block_mode = mode;
        }
        if let Some(limit) = self.max_concurrency {
            config.engine.max_concurrency = (limit > 0).then_some(limit);
        }
        if let Some(timeout) = self.handler_timeout {
            config.engine.handler_timeout = Some(timeout.into());
        }
        if let Some(max) = self.max_string_len {
            config.engine.max_string_len = max;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = PersistConnConfig::load_from_file(&args.config)?;
    let mut config = loaded.config;
    args.apply(&mut config);

    logging::init(&config.log_level)?;

    info!("Starting persistconn v{}", env!("CARGO_PKG_VERSION"));
    match &loaded.origin {
        ConfigOrigin::File(path) => info!("Loaded configuration from {:?}", path),
        ConfigOrigin::Defaults(path) => {
            warn!("Config file {:?} not found, using defaults", path)
        }
    }
    for var in &loaded.overrides {
        info!("Setting overridden by environment: {}", var);
    }
    info!(
        "Engine configuration: init_block_mode={:?}, max_concurrency={:?}, handler_timeout={:?}, max_string_len={}",
        config.engine.init_block_mode,
        config.engine.max_concurrency,
        config.engine.handler_timeout,
        config.engine.max_string_len
    );

    let mut server = Server::with_config(config.engine);
    handlers::register(&mut server)?;

    match server.run_stdio().await {
        Ok(stats) => {
            info!(
                "Host closed the connection after {} frames, {} responses written",
                stats.frames, stats.written
            );
            Ok(())
        }
        Err(e) => {
            error!("persistconn stopped: {}", e);
            Err(e.into())
        }
    }
}

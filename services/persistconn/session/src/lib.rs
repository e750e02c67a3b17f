//! Concurrent dispatch and ordered output for the persistconn engine.
//!
//! The read loop decodes frames one at a time and reserves an output slot
//! for each event in arrival order. Handlers run concurrently on spawned
//! tasks; a single flusher task owns the output stream and writes the
//! longest completed prefix of slots whenever one completes.
//!
//! ## Features
//!
//! - **Sequencer**: arrival-ordered slots with prefix-only flushing
//! - **Dispatcher**: per-request tasks with optional concurrency limit and deadline
//! - **Server**: route registration, read loop, graceful drain on end of input
//!
//! ## Example
//!
//! ```rust,no_run
//! use pconn_session::{EngineConfig, Server};
//! use pconn_wire::{Request, Response};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut server = Server::with_config(EngineConfig::default());
//! server.register(
//!     "entity/:id",
//!     |req: Request| async move {
//!         Ok::<_, anyhow::Error>(Response::ok(format!("entity {}", req.param("id").unwrap_or("?"))))
//!     },
//!     ["GET"],
//! )?;
//!
//! let stats = server.run_stdio().await?;
//! eprintln!("served {} frames", stats.frames);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod sequencer;
pub mod server;

pub use config::{EngineConfig, InitBlockMode};
pub use dispatcher::{run_handler, Dispatcher, PANIC_BODY};
pub use error::ServerError;
pub use sequencer::{channel, Flusher, PendingQueue, Sequencer, SlotId, SlotTicket, ABANDONED_BODY};
pub use server::{ServeStats, Server};

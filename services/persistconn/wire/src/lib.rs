//! Wire protocol framing, request normalization and response encoding for persistconn.
//!
//! The host talks to the engine over a single duplex byte stream. Inbound
//! frames are opcode-tagged and built from length-prefixed strings; outbound
//! units are length-prefixed JSON responses or a bare init acknowledgment.
//!
//! ## Wire Format
//!
//! ```text
//! inbound:   <opcode byte>
//!            [INIT]  <N>\n (<len>\n<bytes>\n){N} <len>\n<bytes>\n
//!            [BLOCK] <len>\n<bytes>\n
//!
//! outbound:  <len>\n{"status":<code>,"payload":<body>}\n
//!            0\n                         (init acknowledgment)
//! ```
//!
//! Opcode bits: `0x01` INIT, `0x02` BLOCK, `0x04` END, `0x08` ALLOW_STREAM.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod opcode;
pub mod request;
pub mod response;

// Re-export main types
pub use codec::{encode_response, Outbound, OutboundReader, INIT_ACK};
pub use error::WireError;
pub use frame::{Command, Frame, FrameDecoder, DEFAULT_MAX_STRING_LEN};
pub use opcode::Opcode;
pub use request::{
    ConnectionInfo, Namespace, Request, RequestDocument, RestMap, RestMapConf, ServerInfo, Session,
};
pub use response::{Response, NOT_FOUND_BODY, TIMEOUT_BODY};

//! Inbound framing for the wire protocol.
//!
//! Each frame starts with an opcode byte (leading newlines skipped), then an
//! optional command section and an optional data block, both made of
//! length-prefixed strings:
//!
//! ```text
//! <opcode>                              always
//! <N>\n(<len>\n<bytes>\n){N}<len>\n<bytes>\n   if INIT
//! <len>\n<bytes>\n                      if BLOCK
//! ```
//!
//! The trailing newline after each string body is consumed lazily: blank
//! lines before a length and before an opcode are skipped.

use crate::error::WireError;
use crate::opcode::Opcode;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

/// Default limit for a single length-prefixed string (64 MiB)
pub const DEFAULT_MAX_STRING_LEN: usize = 64 * 1024 * 1024;

/// Longest accepted length/count line, newline included
const MAX_NUMBER_LINE: u64 = 32;

/// Command section of an INIT frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Command list, in wire order
    pub parts: Vec<String>,
    /// Command argument
    pub arg: String,
}

/// One fully decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode bits as received
    pub opcode: Opcode,
    /// Present only when INIT is set
    pub command: Option<Command>,
    /// Present only when BLOCK is set
    pub block: Option<String>,
}

impl Frame {
    /// A BLOCK frame carrying `block`
    pub fn block(block: impl Into<String>) -> Self {
        Self {
            opcode: Opcode::BLOCK,
            command: None,
            block: Some(block.into()),
        }
    }

    /// An INIT frame carrying a command
    pub fn init(command: Command) -> Self {
        Self {
            opcode: Opcode::INIT,
            command: Some(command),
            block: None,
        }
    }

    /// Add extra opcode bits
    pub fn with_opcode(mut self, extra: Opcode) -> Self {
        self.opcode |= extra;
        self
    }

    /// Attach a data block and set BLOCK
    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.opcode |= Opcode::BLOCK;
        self.block = Some(block.into());
        self
    }

    /// Encode in the inbound grammar, the way the host writes it
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.opcode.to_byte());

        if self.opcode.is_init() {
            let empty = Command::default();
            let command = self.command.as_ref().unwrap_or(&empty);
            put_number(&mut buf, command.parts.len());
            for part in &command.parts {
                put_string(&mut buf, part);
            }
            put_string(&mut buf, &command.arg);
        }

        if self.opcode.has_block() {
            put_string(&mut buf, self.block.as_deref().unwrap_or_default());
        }

        buf.freeze()
    }
}

fn put_number(buf: &mut BytesMut, n: usize) {
    buf.put_slice(n.to_string().as_bytes());
    buf.put_u8(b'\n');
}

/// Write `<len>\n<bytes>\n`
pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    put_number(buf, s.len());
    buf.put_slice(s.as_bytes());
    buf.put_u8(b'\n');
}

/// Sequential frame reader over a buffered byte stream
#[derive(Debug)]
pub struct FrameDecoder<R> {
    reader: R,
    max_string_len: usize,
}

impl<R> FrameDecoder<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new frame decoder
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }

    /// Override the per-string size limit
    pub fn with_max_string_len(mut self, max_string_len: usize) -> Self {
        self.max_string_len = max_string_len;
        self
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends while waiting for an opcode.
    /// End of stream anywhere after the opcode is [`WireError::TruncatedFrame`].
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, WireError> {
        let opcode = match self.read_opcode().await? {
            Some(opcode) => opcode,
            None => return Ok(None),
        };

        let command = if opcode.is_init() {
            let count = self.read_number().await?;
            if count > self.max_string_len {
                return Err(WireError::FrameTooLarge(count));
            }
            let mut parts = Vec::with_capacity(count.min(16));
            for _ in 0..count {
                parts.push(self.read_string().await?);
            }
            let arg = self.read_string().await?;
            Some(Command { parts, arg })
        } else {
            None
        };

        let block = if opcode.has_block() {
            Some(self.read_string().await?)
        } else {
            None
        };

        trace!(
            component = "wire",
            "Decoded frame opcode=0x{:02x} command={:?} block_len={:?}",
            opcode.to_byte(),
            command.as_ref().map(|c| c.parts.len()),
            block.as_ref().map(String::len)
        );

        Ok(Some(Frame {
            opcode,
            command,
            block,
        }))
    }

    async fn read_opcode(&mut self) -> Result<Option<Opcode>, WireError> {
        loop {
            match self.reader.read_u8().await {
                Ok(b'\n') => continue,
                Ok(byte) => return Ok(Some(Opcode::from_byte(byte))),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(WireError::Io(e)),
            }
        }
    }

    async fn read_number(&mut self) -> Result<usize, WireError> {
        read_number(&mut self.reader).await
    }

    async fn read_string(&mut self) -> Result<String, WireError> {
        read_string(&mut self.reader, self.max_string_len).await
    }
}

/// Read a non-negative decimal line, skipping blank lines before it
pub(crate) async fn read_number<R>(reader: &mut R) -> Result<usize, WireError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        let read = (&mut *reader)
            .take(MAX_NUMBER_LINE)
            .read_until(b'\n', &mut line)
            .await
            .map_err(WireError::mid_frame)?;

        if line.last() != Some(&b'\n') {
            if read as u64 == MAX_NUMBER_LINE {
                return Err(WireError::MalformedLength(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            }
            return Err(WireError::TruncatedFrame);
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let value: i64 = text
            .parse()
            .map_err(|_| WireError::MalformedLength(text.to_string()))?;
        return usize::try_from(value).map_err(|_| WireError::MalformedLength(text.to_string()));
    }
}

/// Read `<len>\n<bytes>` as UTF-8
pub(crate) async fn read_string<R>(reader: &mut R, max_len: usize) -> Result<String, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let len = read_number(reader).await?;
    read_body(reader, len, max_len).await
}

/// Read exactly `len` bytes as UTF-8
pub(crate) async fn read_body<R>(reader: &mut R, len: usize, max_len: usize) -> Result<String, WireError>
where
    R: AsyncBufRead + Unpin,
{
    if len > max_len {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut content = vec![0u8; len];
    reader
        .read_exact(&mut content)
        .await
        .map_err(WireError::mid_frame)?;

    String::from_utf8(content).map_err(|_| WireError::InvalidUtf8)
}

//! Outbound encoding for the wire protocol.
//!
//! Every outbound unit is either a response, written as `<len>\n<json>\n`, or
//! an init acknowledgment, written as the two bytes `0\n`. [`OutboundReader`]
//! is the matching reader used on the host side of a pipe.

use crate::error::WireError;
use crate::frame::{put_string, read_body, read_number, DEFAULT_MAX_STRING_LEN};
use crate::response::Response;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Encoded init acknowledgment
pub const INIT_ACK: &[u8] = b"0\n";

/// One unit written to the output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Acknowledge an INIT frame
    InitAck,
    /// Handler result
    Response(Response),
}

impl Outbound {
    /// Encode for the output stream
    pub fn encode(&self) -> Result<Bytes, WireError> {
        match self {
            Outbound::InitAck => Ok(Bytes::from_static(INIT_ACK)),
            Outbound::Response(response) => encode_response(response),
        }
    }
}

impl From<Response> for Outbound {
    fn from(response: Response) -> Self {
        Outbound::Response(response)
    }
}

/// Encode a response as `<byteLength>\n<json>\n`
pub fn encode_response(response: &Response) -> Result<Bytes, WireError> {
    let json = serde_json::to_string(response).map_err(WireError::Encode)?;
    let mut buf = BytesMut::with_capacity(json.len() + 16);
    put_string(&mut buf, &json);
    Ok(buf.freeze())
}

/// Reads outbound units back off a byte stream
#[derive(Debug)]
pub struct OutboundReader<R> {
    reader: R,
}

impl<R> OutboundReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next unit, `Ok(None)` at a clean end of stream
    pub async fn read(&mut self) -> Result<Option<Outbound>, WireError> {
        loop {
            let next = self.reader.fill_buf().await?.first().copied();
            match next {
                None => return Ok(None),
                Some(b'\n') => self.reader.consume(1),
                Some(_) => break,
            }
        }

        let len = read_number(&mut self.reader).await?;
        if len == 0 {
            return Ok(Some(Outbound::InitAck));
        }

        let json = read_body(&mut self.reader, len, DEFAULT_MAX_STRING_LEN).await?;
        let response = serde_json::from_str(&json).map_err(WireError::MalformedResponse)?;
        Ok(Some(Outbound::Response(response)))
    }

    /// Read every remaining unit
    pub async fn read_all(&mut self) -> Result<Vec<Outbound>, WireError> {
        let mut units = Vec::new();
        while let Some(unit) = self.read().await? {
            units.push(unit);
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_ack_bytes() {
        assert_eq!(Outbound::InitAck.encode().unwrap().as_ref(), b"0\n");
    }

    #[test]
    fn test_response_framing() {
        let encoded = encode_response(&Response::ok("hello world")).unwrap();
        let json = r#"{"status":200,"payload":"hello world"}"#;
        assert_eq!(encoded.as_ref(), format!("{}\n{}\n", json.len(), json).as_bytes());
    }

    #[tokio::test]
    async fn test_reader_recovers_units() {
        let units = vec![
            Outbound::InitAck,
            Outbound::Response(Response::ok("multi\nline")),
            Outbound::Response(Response::internal_error("boom").with_header("Retry-After", "1")),
            Outbound::InitAck,
            Outbound::Response(Response::not_found()),
        ];

        let mut wire = Vec::new();
        for unit in &units {
            wire.extend_from_slice(&unit.encode().unwrap());
        }

        let decoded = OutboundReader::new(wire.as_slice()).read_all().await.unwrap();
        assert_eq!(decoded, units);
    }

    #[tokio::test]
    async fn test_reader_truncated() {
        let err = OutboundReader::new(&b"40\n{\"status\""[..]).read().await.unwrap_err();
        assert!(matches!(err, WireError::TruncatedFrame));
    }
}

//! Handler responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of the built-in not-found response
pub const NOT_FOUND_BODY: &str = "The requested path is not found.";

/// Body of a response whose handler exceeded its deadline
pub const TIMEOUT_BODY: &str = "handler timed out";

/// Response produced by a handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    #[serde(rename = "status")]
    pub status_code: u16,
    /// Response body
    #[serde(rename = "payload", default)]
    pub body: String,
    /// Extra HTTP headers, omitted on the wire when empty
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Response {
    /// Create a response with the given status and body
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    /// 200 OK
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// 400, used when the request document cannot be decoded
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// 404 with the fixed not-found body
    pub fn not_found() -> Self {
        Self::new(404, NOT_FOUND_BODY)
    }

    /// 500 carrying a handler error message
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    /// 504 for a handler that ran past its deadline
    pub fn gateway_timeout() -> Self {
        Self::new(504, TIMEOUT_BODY)
    }

    /// Add a response header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

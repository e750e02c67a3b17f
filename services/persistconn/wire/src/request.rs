//! Host request document and its normalized, handler-facing form.
//!
//! The host sends one JSON document per request inside the data block. Every
//! member is optional on the wire and defaults when absent. Tuple-list members
//! (`headers`, `query`, `form`) arrive as arrays of `[key, value]` pairs and are
//! flattened into maps, last pair winning.

use crate::error::WireError;
use crate::frame::Frame;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A `null` member reads as the type's default, same as an absent one
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `[[key, value, ...], ...]`; elements past the value are ignored, `null` is empty
fn pair_list<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Vec<String>>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|entry| {
            let mut parts = entry.into_iter();
            match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => Ok((key, value)),
                _ => Err(serde::de::Error::custom("expected a [key, value] pair")),
            }
        })
        .collect()
}

/// Server identity as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Management URI of the host
    #[serde(deserialize_with = "null_default")]
    pub rest_uri: String,
    /// Host name
    #[serde(deserialize_with = "null_default")]
    pub hostname: String,
    /// Configured server name
    #[serde(deserialize_with = "null_default")]
    pub servername: String,
    /// Server GUID
    #[serde(deserialize_with = "null_default")]
    pub guid: String,
}

/// Restmap stanza configuration for the endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestMapConf {
    /// Handler identifier
    #[serde(deserialize_with = "null_default")]
    pub handler: String,
    /// Path prefix this endpoint is mounted at
    #[serde(rename = "match", deserialize_with = "null_default")]
    pub match_path: String,
    /// Allowed output modes
    #[serde(deserialize_with = "null_default")]
    pub output_modes: String,
    /// Whether HTTP headers are forwarded
    #[serde(rename = "passHttpHeaders", deserialize_with = "null_default")]
    pub pass_http_headers: String,
    /// Whether the raw payload is forwarded
    #[serde(rename = "passPayload", deserialize_with = "null_default")]
    pub pass_payload: String,
    /// Script name
    #[serde(deserialize_with = "null_default")]
    pub script: String,
    /// Script type
    #[serde(deserialize_with = "null_default")]
    pub scripttype: String,
}

/// Restmap entry that routed the request to this process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestMap {
    /// Stanza name
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    /// Stanza configuration
    #[serde(deserialize_with = "null_default")]
    pub conf: RestMapConf,
}

/// Client connection details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    /// Client address
    #[serde(deserialize_with = "null_default")]
    pub src_ip: String,
    /// Whether the client connection used TLS
    #[serde(deserialize_with = "null_default")]
    pub ssl: bool,
    /// Port the host accepted the connection on
    #[serde(deserialize_with = "null_default")]
    pub listening_port: u16,
}

/// Authenticated session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Authenticated user
    #[serde(deserialize_with = "null_default")]
    pub user: String,
    /// Session token
    #[serde(rename = "authtoken", deserialize_with = "null_default")]
    pub auth_token: String,
}

/// Application/user namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Namespace {
    /// Application context
    #[serde(deserialize_with = "null_default")]
    pub app: String,
    /// User context
    #[serde(deserialize_with = "null_default")]
    pub user: String,
}

/// Request document exactly as the host encodes it
#[allow(missing_docs)] // field names mirror the host document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDocument {
    #[serde(deserialize_with = "null_default")]
    pub output_mode: String,
    #[serde(deserialize_with = "null_default")]
    pub output_mode_explicit: bool,
    #[serde(deserialize_with = "null_default")]
    pub server: ServerInfo,
    #[serde(deserialize_with = "null_default")]
    pub restmap: RestMap,
    #[serde(deserialize_with = "null_default")]
    pub path_info: String,
    #[serde(deserialize_with = "pair_list")]
    pub query: Vec<(String, String)>,
    #[serde(deserialize_with = "null_default")]
    pub connection: ConnectionInfo,
    #[serde(deserialize_with = "null_default")]
    pub session: Session,
    #[serde(deserialize_with = "null_default")]
    pub rest_path: String,
    #[serde(deserialize_with = "null_default")]
    pub method: String,
    #[serde(deserialize_with = "null_default")]
    pub ns: Namespace,
    #[serde(deserialize_with = "pair_list")]
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(deserialize_with = "pair_list")]
    pub form: Vec<(String, String)>,
    #[serde(skip_serializing_if = "String::is_empty")]
    #[serde(deserialize_with = "null_default")]
    pub payload: String,
}

/// Normalized request handed to handlers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Requested output mode (`json`, `xml`, ...)
    pub output_mode: String,
    /// Whether the client asked for the output mode explicitly
    pub output_mode_explicit: bool,
    /// HTTP headers
    pub headers: HashMap<String, String>,
    /// HTTP method
    pub method: String,
    /// Application/user namespace
    pub namespace: Namespace,
    /// Authenticated session
    pub session: Session,
    /// Query string parameters
    pub query: HashMap<String, String>,
    /// Form parameters
    pub form: HashMap<String, String>,
    /// Raw request body
    pub payload: String,
    /// Routed path
    pub path: String,
    /// Full REST path as seen by the host
    pub rest_path: String,
    /// Named path parameters, filled in by the router
    pub params: HashMap<String, String>,
    /// Host server identity
    pub server: ServerInfo,
    /// Client connection details
    pub connection: ConnectionInfo,
}

impl Request {
    /// Parse and normalize a data block
    pub fn from_block(block: &str) -> Result<Self, WireError> {
        let document: RequestDocument =
            serde_json::from_str(block).map_err(WireError::MalformedRequest)?;
        Ok(Self::from(document))
    }

    /// Normalize the data block of a frame; a frame without one yields a default request
    pub fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        match frame.block.as_deref() {
            Some(block) => Self::from_block(block),
            None => Ok(Self::default()),
        }
    }

    /// Bound path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Header value by name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl From<RequestDocument> for Request {
    fn from(document: RequestDocument) -> Self {
        let path = if document.path_info.is_empty() {
            document.rest_path.clone()
        } else {
            document.path_info
        };

        Self {
            output_mode: document.output_mode,
            output_mode_explicit: document.output_mode_explicit,
            headers: pairs_to_map(document.headers),
            method: document.method,
            namespace: document.ns,
            session: document.session,
            query: pairs_to_map(document.query),
            form: pairs_to_map(document.form),
            payload: document.payload,
            path,
            rest_path: document.rest_path,
            params: HashMap::new(),
            server: document.server,
            connection: document.connection,
        }
    }
}

/// Flatten `[key, value]` pairs, last pair wins
fn pairs_to_map(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    pairs.into_iter().collect()
}

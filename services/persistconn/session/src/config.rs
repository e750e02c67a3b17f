//! Engine configuration

use pconn_wire::DEFAULT_MAX_STRING_LEN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a frame with both INIT and BLOCK set is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitBlockMode {
    /// Two events: an init acknowledgment, then the data request
    #[default]
    Separate,
    /// One event: the block is the first data request, no acknowledgment
    FirstRequest,
}

impl std::str::FromStr for InitBlockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "separate" => Ok(InitBlockMode::Separate),
            "first-request" | "first_request" => Ok(InitBlockMode::FirstRequest),
            other => Err(format!("unknown init/block mode {:?}", other)),
        }
    }
}

/// Configuration for the dispatch engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpretation of INIT+BLOCK frames
    pub init_block_mode: InitBlockMode,
    /// Maximum handlers running at once; `None` or `0` is unbounded
    pub max_concurrency: Option<usize>,
    /// Per-handler deadline; `None` waits forever
    #[serde(with = "humantime_serde_opt")]
    pub handler_timeout: Option<Duration>,
    /// Largest accepted length-prefixed string
    pub max_string_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            init_block_mode: InitBlockMode::Separate,
            max_concurrency: None,
            handler_timeout: None,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

/// `Option<Duration>` as a humantime string (`"30s"`, `"250ms"`)
mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&humantime::format_duration(*duration).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

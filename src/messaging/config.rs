//! Runtime configuration for a chat replica.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::messaging::limits::{MAX_MESSAGES_PER_MERGE, MAX_PAYLOAD_BYTES};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_payload_bytes must be in 1..={max}, got {value}")]
    PayloadLimit { value: usize, max: usize },

    #[error("max_messages_per_merge must be positive")]
    MergeBatch,
}

/// Per-replica knobs. Missing JSON fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Largest message body a local user may post. Never above [`MAX_PAYLOAD_BYTES`].
    pub max_payload_bytes: usize,
    /// Peer log entries examined per merge call; the rest wait for the next call.
    pub max_messages_per_merge: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            max_messages_per_merge: MAX_MESSAGES_PER_MERGE,
        }
    }
}

impl ChatConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_bytes == 0 || self.max_payload_bytes > MAX_PAYLOAD_BYTES {
            return Err(ConfigError::PayloadLimit {
                value: self.max_payload_bytes,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        if self.max_messages_per_merge == 0 {
            return Err(ConfigError::MergeBatch);
        }
        Ok(())
    }
}

impl fmt::Display for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChatConfig(max_payload={}, merge_batch={})",
            self.max_payload_bytes, self.max_messages_per_merge
        )
    }
}

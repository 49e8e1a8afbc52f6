//! Streaming client configuration.

use crate::error::{WsError, WsResult};

/// Connection configuration. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Maximum automatic reconnect attempts after abnormal closures.
    pub reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_interval_ms: u64,
    /// Heartbeat interval.
    pub heartbeat_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_attempts: 5,
            reconnect_interval_ms: 1_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl ConnectionConfig {
    /// Validate configuration. A malformed config is a programming error
    /// and the only rejection path outside the boolean send/health gates.
    pub fn validate(&self) -> WsResult<()> {
        if self.url.is_empty() {
            return Err(WsError::InvalidConfig("url must not be empty".to_string()));
        }
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(WsError::InvalidConfig(format!(
                "url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(WsError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

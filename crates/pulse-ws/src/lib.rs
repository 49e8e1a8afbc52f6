//! Resilient streaming client for dashboard market-data connections.
//!
//! Provides robust WebSocket connectivity with:
//! - Bounded automatic reconnection after abnormal closures
//! - Health-gated sends backed by a circuit breaker and bounded buffering
//! - Envelope stamping (timestamp + id) on every outbound frame
//! - Named-event routing of decoded inbound frames
//! - Heartbeat ticks that double as periodic health checks

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod heartbeat;

pub use config::ConnectionConfig;
pub use connection::{ConnectionState, StreamClient};
pub use dispatch::{EventRegistry, HandlerId};
pub use envelope::{generate_id, HEARTBEAT_TYPE};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatStats;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

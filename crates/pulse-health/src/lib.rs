//! Connection health tracking for the pulse feed layer.
//!
//! Provides the health monitor that gates outbound traffic:
//! - Rolling latency, message-rate and error-rate estimation
//! - Circuit breaker with half-open recovery probing
//! - Bounded outbound buffering under backpressure

pub mod config;
pub mod error;
pub mod monitor;

pub use config::HealthConfig;
pub use error::{HealthError, HealthResult};
pub use monitor::{CircuitBreakerState, HealthMetrics, HealthMonitor, HealthStatus};

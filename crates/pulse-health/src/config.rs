//! Health monitor configuration.

use crate::error::{HealthError, HealthResult};
use serde::{Deserialize, Serialize};

/// Configuration for the health monitor and circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before an open breaker is eligible to half-open (ms).
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: i64,

    /// Maximum silence before the connection counts as inactive (ms).
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: i64,

    /// Maximum acceptable average latency (ms).
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: f64,

    /// Maximum acceptable error rate (fraction in [0, 1]).
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Minimum acceptable message rate (messages per minute).
    #[serde(default = "default_min_message_rate")]
    pub min_message_rate: f64,

    /// Capacity of the outbound message buffer.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_ms() -> i64 {
    60_000
}
fn default_monitoring_window_ms() -> i64 {
    300_000
}
fn default_max_latency_ms() -> f64 {
    5_000.0
}
fn default_max_error_rate() -> f64 {
    0.1
}
fn default_min_message_rate() -> f64 {
    0.1
}
fn default_max_queue_size() -> usize {
    1_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
            max_latency_ms: default_max_latency_ms(),
            max_error_rate: default_max_error_rate(),
            min_message_rate: default_min_message_rate(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl HealthConfig {
    /// Validate configuration bounds.
    pub fn validate(&self) -> HealthResult<()> {
        if self.failure_threshold == 0 {
            return Err(HealthError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.recovery_timeout_ms <= 0 {
            return Err(HealthError::InvalidConfig(
                "recovery_timeout_ms must be positive".to_string(),
            ));
        }
        if self.monitoring_window_ms <= 0 {
            return Err(HealthError::InvalidConfig(
                "monitoring_window_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(HealthError::InvalidConfig(format!(
                "max_error_rate {} outside [0, 1]",
                self.max_error_rate
            )));
        }
        if self.max_latency_ms <= 0.0 {
            return Err(HealthError::InvalidConfig(
                "max_latency_ms must be positive".to_string(),
            ));
        }
        if self.min_message_rate < 0.0 {
            return Err(HealthError::InvalidConfig(
                "min_message_rate must not be negative".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(HealthError::InvalidConfig(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

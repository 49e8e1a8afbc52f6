//! Connection health monitor with circuit breaker.
//!
//! Tracks rolling latency, message and error rates, and activity recency
//! for one logical connection. Repeated failures open a circuit breaker
//! that gates outbound sends; while sends are blocked, payloads can be
//! parked in a bounded buffer and drained once the connection recovers.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;

/// Latency samples kept for the rolling average.
const LATENCY_WINDOW: usize = 100;
/// Activity/error timestamps kept per window.
const EVENT_WINDOW: usize = 100;
/// Trailing horizon for rate estimation.
const RATE_HORIZON_MS: i64 = 60_000;

/// Circuit breaker state snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u32,
    pub last_failure_ms: i64,
    pub next_retry_ms: i64,
}

/// Rolling connection metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Rolling average latency in milliseconds.
    pub latency_ms: f64,
    /// Estimated messages per minute over the trailing horizon.
    pub message_rate: f64,
    /// Estimated error fraction in [0, 1] over the trailing horizon.
    pub error_rate: f64,
    /// Milliseconds since monitor construction.
    pub uptime_ms: i64,
    /// Epoch ms of the most recent successful message.
    pub last_activity_ms: i64,
}

/// Diagnostic snapshot returned by [`HealthMonitor::health_status`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub metrics: HealthMetrics,
    pub circuit_breaker: CircuitBreakerState,
    /// Human-readable list of failed checks. Diagnostics only.
    pub issues: Vec<String>,
}

#[derive(Debug)]
struct MonitorState {
    latencies: VecDeque<f64>,
    message_times: VecDeque<i64>,
    error_times: VecDeque<i64>,
    breaker: CircuitBreakerState,
    buffer: VecDeque<Value>,
    last_activity_ms: i64,
    started_ms: i64,
}

impl MonitorState {
    fn new(now: i64) -> Self {
        Self {
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            message_times: VecDeque::with_capacity(EVENT_WINDOW),
            error_times: VecDeque::with_capacity(EVENT_WINDOW),
            breaker: CircuitBreakerState::default(),
            buffer: VecDeque::new(),
            last_activity_ms: now,
            started_ms: now,
        }
    }

    fn prune(&mut self, now: i64) {
        let cutoff = now - RATE_HORIZON_MS;
        while self.message_times.front().is_some_and(|&t| t < cutoff) {
            self.message_times.pop_front();
        }
        while self.error_times.front().is_some_and(|&t| t < cutoff) {
            self.error_times.pop_front();
        }
    }
}

/// Health monitor and send gate for one logical connection.
///
/// Construct one per connection and share it by `Arc`; all methods take
/// `&self`. The streaming client feeds it through [`record_message`] and
/// [`record_error`] and consults [`can_send_message`] before every
/// non-heartbeat send.
///
/// [`record_message`]: HealthMonitor::record_message
/// [`record_error`]: HealthMonitor::record_error
/// [`can_send_message`]: HealthMonitor::can_send_message
pub struct HealthMonitor {
    config: HealthConfig,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    /// Create a monitor with the given configuration.
    pub fn new(config: HealthConfig) -> crate::error::HealthResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(MonitorState::new(now_ms())),
        })
    }

    /// Create a monitor with default thresholds.
    pub fn with_defaults() -> Self {
        Self {
            config: HealthConfig::default(),
            state: Mutex::new(MonitorState::new(now_ms())),
        }
    }

    /// Record a successfully received message, optionally with a latency
    /// sample in milliseconds.
    pub fn record_message(&self, latency_ms: Option<f64>) {
        let now = now_ms();
        let mut state = self.state.lock();
        state.last_activity_ms = now;

        state.message_times.push_back(now);
        while state.message_times.len() > EVENT_WINDOW {
            state.message_times.pop_front();
        }

        if let Some(latency) = latency_ms {
            state.latencies.push_back(latency.max(0.0));
            while state.latencies.len() > LATENCY_WINDOW {
                state.latencies.pop_front();
            }
        }
        state.prune(now);
    }

    /// Record a failure. Opens the circuit breaker once the failure count
    /// reaches the configured threshold.
    pub fn record_error(&self, detail: Option<&str>) {
        let now = now_ms();
        let mut state = self.state.lock();
        state.breaker.failure_count += 1;
        state.breaker.last_failure_ms = now;

        state.error_times.push_back(now);
        while state.error_times.len() > EVENT_WINDOW {
            state.error_times.pop_front();
        }
        state.prune(now);

        if state.breaker.failure_count >= self.config.failure_threshold {
            let was_open = state.breaker.is_open;
            state.breaker.is_open = true;
            state.breaker.next_retry_ms = now + self.config.recovery_timeout_ms;
            if !was_open {
                warn!(
                    failures = state.breaker.failure_count,
                    retry_in_ms = self.config.recovery_timeout_ms,
                    detail = detail.unwrap_or("unspecified"),
                    "Circuit breaker opened"
                );
            }
        } else {
            debug!(
                failures = state.breaker.failure_count,
                detail = detail.unwrap_or("unspecified"),
                "Failure recorded"
            );
        }
    }

    /// Run a health check.
    ///
    /// An open breaker whose retry time has elapsed performs exactly one
    /// half-open transition here: the breaker clears and the failure count
    /// drops by one, so a single further failure re-opens it while a quiet
    /// probe leaves it closed.
    pub fn is_healthy(&self) -> bool {
        let now = now_ms();
        let mut state = self.state.lock();

        if state.breaker.is_open {
            if now < state.breaker.next_retry_ms {
                return false;
            }
            state.breaker.is_open = false;
            state.breaker.failure_count = state.breaker.failure_count.saturating_sub(1);
            info!(
                failure_count = state.breaker.failure_count,
                "Circuit breaker half-open"
            );
        }

        let metrics = compute_metrics(&mut state, now);
        self.checks_pass(&metrics, now)
    }

    /// Diagnostic snapshot. Never mutates breaker state; half-open
    /// transitions happen only in [`is_healthy`](HealthMonitor::is_healthy).
    pub fn health_status(&self) -> HealthStatus {
        let now = now_ms();
        let mut state = self.state.lock();
        let metrics = compute_metrics(&mut state, now);
        let circuit_breaker = state.breaker.clone();
        drop(state);

        let issues = self.collect_issues(&metrics, &circuit_breaker, now);
        HealthStatus {
            is_healthy: issues.is_empty(),
            metrics,
            circuit_breaker,
            issues,
        }
    }

    /// Whether a send is currently permitted. False while the breaker is
    /// open or the outbound buffer is full.
    pub fn can_send_message(&self) -> bool {
        let state = self.state.lock();
        !state.breaker.is_open && state.buffer.len() < self.config.max_queue_size
    }

    /// Whether the circuit breaker is currently open.
    pub fn circuit_open(&self) -> bool {
        self.state.lock().breaker.is_open
    }

    /// Park an outbound payload while sends are blocked. Rejects only when
    /// the buffer is at capacity.
    pub fn buffer_message(&self, payload: Value) -> bool {
        let mut state = self.state.lock();
        if state.buffer.len() >= self.config.max_queue_size {
            debug!(
                capacity = self.config.max_queue_size,
                "Outbound buffer full, payload dropped"
            );
            return false;
        }
        state.buffer.push_back(payload);
        true
    }

    /// Drain the outbound buffer, returning its contents in insertion order.
    pub fn flush_message_buffer(&self) -> Vec<Value> {
        let mut state = self.state.lock();
        let drained: Vec<Value> = state.buffer.drain(..).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Outbound buffer drained");
        }
        drained
    }

    /// Number of currently buffered payloads.
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Unconditionally clear breaker state. Operator/test recovery path,
    /// never invoked automatically.
    pub fn reset_circuit_breaker(&self) {
        let mut state = self.state.lock();
        state.breaker = CircuitBreakerState::default();
        info!("Circuit breaker reset");
    }

    fn checks_pass(&self, metrics: &HealthMetrics, now: i64) -> bool {
        metrics.latency_ms <= self.config.max_latency_ms
            && metrics.error_rate <= self.config.max_error_rate
            && metrics.message_rate >= self.config.min_message_rate
            && now - metrics.last_activity_ms < self.config.monitoring_window_ms
    }

    fn collect_issues(
        &self,
        metrics: &HealthMetrics,
        breaker: &CircuitBreakerState,
        now: i64,
    ) -> Vec<String> {
        let mut issues = Vec::new();
        if breaker.is_open {
            issues.push(format!(
                "circuit breaker open until {}",
                breaker.next_retry_ms
            ));
        }
        if metrics.latency_ms > self.config.max_latency_ms {
            issues.push(format!(
                "latency {:.1}ms exceeds {:.1}ms",
                metrics.latency_ms, self.config.max_latency_ms
            ));
        }
        if metrics.error_rate > self.config.max_error_rate {
            issues.push(format!(
                "error rate {:.2} exceeds {:.2}",
                metrics.error_rate, self.config.max_error_rate
            ));
        }
        if metrics.message_rate < self.config.min_message_rate {
            issues.push(format!(
                "message rate {:.2}/min below {:.2}/min",
                metrics.message_rate, self.config.min_message_rate
            ));
        }
        let idle_ms = now - metrics.last_activity_ms;
        if idle_ms >= self.config.monitoring_window_ms {
            issues.push(format!("no activity for {idle_ms}ms"));
        }
        issues
    }
}

/// Rates are estimates over capped trailing windows, not lifetime counters:
/// both decay toward zero on an idle connection instead of dividing by zero.
fn compute_metrics(state: &mut MonitorState, now: i64) -> HealthMetrics {
    state.prune(now);

    let latency_ms = if state.latencies.is_empty() {
        0.0
    } else {
        state.latencies.iter().sum::<f64>() / state.latencies.len() as f64
    };

    let messages = state.message_times.len();
    let errors = state.error_times.len();
    let message_rate = messages as f64 * (60_000.0 / RATE_HORIZON_MS as f64);
    let error_rate = if errors == 0 {
        0.0
    } else {
        errors as f64 / (errors + messages) as f64
    };

    HealthMetrics {
        latency_ms,
        message_rate,
        error_rate,
        uptime_ms: now - state.started_ms,
        last_activity_ms: state.last_activity_ms,
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

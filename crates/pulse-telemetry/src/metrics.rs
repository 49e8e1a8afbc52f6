//! Prometheus metrics for the streaming connection layer.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent
//! failure. These panics only occur during static initialization, never at
//! runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter,
    register_int_gauge, CounterVec, Gauge, GaugeVec, IntCounter, IntGauge,
};

/// Streaming connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "pulse_ws_connected",
        "Streaming connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected/error)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pulse_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnection attempts scheduled.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pulse_ws_reconnect_total",
        "Total streaming reconnection attempts scheduled"
    )
    .unwrap()
});

/// Total outbound messages sent by kind.
/// Labels: kind (data/heartbeat)
pub static WS_MSGS_SENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_ws_msgs_sent_total",
        "Total outbound messages sent by kind",
        &["kind"]
    )
    .unwrap()
});

/// Total outbound messages refused by reason.
/// Labels: reason (not_connected/health_gate/queue_full)
pub static WS_MSGS_BLOCKED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_ws_msgs_blocked_total",
        "Total outbound messages refused",
        &["reason"]
    )
    .unwrap()
});

/// Circuit breaker state (1=open, 0=closed).
pub static CIRCUIT_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pulse_ws_circuit_open",
        "Circuit breaker state (1=open, 0=closed)"
    )
    .unwrap()
});

/// Current outbound buffer depth.
pub static BUFFER_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pulse_ws_buffer_depth",
        "Payloads parked in the outbound buffer"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the state machine state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in &["disconnected", "connecting", "connected", "error"] {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
        WS_CONNECTED.set(if state == "connected" { 1.0 } else { 0.0 });
    }

    /// Record a scheduled reconnection attempt.
    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    /// Record an outbound message sent.
    pub fn ws_msg_sent(kind: &str) {
        WS_MSGS_SENT_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record an outbound message refused.
    pub fn ws_msg_blocked(reason: &str) {
        WS_MSGS_BLOCKED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Update the circuit breaker gauge.
    pub fn circuit_open(is_open: bool) {
        CIRCUIT_OPEN.set(if is_open { 1 } else { 0 });
    }

    /// Update the outbound buffer depth gauge.
    pub fn buffer_depth(depth: usize) {
        BUFFER_DEPTH.set(depth as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_gauge_exclusive() {
        Metrics::ws_state_set("connected");
        assert_eq!(WS_STATE.with_label_values(&["connected"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["disconnected"]).get(), 0.0);
        assert_eq!(WS_CONNECTED.get(), 1.0);

        Metrics::ws_state_set("error");
        assert_eq!(WS_STATE.with_label_values(&["connected"]).get(), 0.0);
        assert_eq!(WS_STATE.with_label_values(&["error"]).get(), 1.0);
        assert_eq!(WS_CONNECTED.get(), 0.0);
    }

    #[test]
    fn test_counters_increment() {
        let before = WS_MSGS_SENT_TOTAL.with_label_values(&["data"]).get();
        Metrics::ws_msg_sent("data");
        let after = WS_MSGS_SENT_TOTAL.with_label_values(&["data"]).get();
        assert_eq!(after, before + 1.0);
    }
}

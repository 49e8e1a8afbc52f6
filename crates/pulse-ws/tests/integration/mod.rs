//! Integration tests for pulse-ws.
//!
//! These tests drive the streaming client against a real in-process
//! WebSocket server:
//! - Connection lifecycle and idempotency
//! - Envelope stamping on the wire
//! - Bounded reconnection after abnormal closures
//! - Health-gate interaction with sends and buffering

pub mod common;

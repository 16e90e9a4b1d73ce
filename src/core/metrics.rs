// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("ws_dispatch_connected_clients", "Number of currently connected clients.").unwrap();

    // --- Server-wide Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("ws_dispatch_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections dropped at accept time because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("ws_dispatch_connections_rejected_total", "Total number of connections rejected at the client limit.").unwrap();
    /// Inbound frames, labeled by opcode name.
    pub static ref FRAMES_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!("ws_dispatch_frames_received_total", "Total number of frames received, labeled by opcode.", &["opcode"]).unwrap();
    /// Commands routed to a handler, labeled `sync` or `async`.
    pub static ref COMMANDS_DISPATCHED_TOTAL: CounterVec =
        register_counter_vec!("ws_dispatch_commands_dispatched_total", "Total number of commands dispatched, labeled by handler kind.", &["kind"]).unwrap();
    pub static ref UNKNOWN_COMMANDS_TOTAL: Counter =
        register_counter!("ws_dispatch_unknown_commands_total", "Total number of text frames with no registered handler.").unwrap();
    pub static ref HANDLER_FAILURES_TOTAL: Counter =
        register_counter!("ws_dispatch_handler_failures_total", "Total number of synchronous handler failures.").unwrap();
    /// Connections torn down because of a malformed handshake or frame.
    pub static ref PROTOCOL_ERRORS_TOTAL: Counter =
        register_counter!("ws_dispatch_protocol_errors_total", "Total number of protocol errors.").unwrap();

    // --- Histograms ---
    /// Time spent routing a text frame, including any synchronous handler and its reply.
    pub static ref DISPATCH_LATENCY_SECONDS: Histogram =
        register_histogram!("ws_dispatch_dispatch_latency_seconds", "Latency of command dispatch in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}

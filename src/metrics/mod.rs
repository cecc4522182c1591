//! Prometheus metrics for the room presence service.
//!
//! Covers connection lifecycle, room occupancy, and broadcast delivery.
//! Gauges are refreshed from live state when the /metrics endpoint is
//! scraped; counters are recorded at the point of the event.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, register_int_gauge_vec, Encoder,
    Histogram, IntCounter, IntGauge, IntGaugeVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "eventroom";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total WebSocket connections opened since startup
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed since startup
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connection lifetime distribution
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0]
    ).unwrap();

    /// Current number of active WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Current number of active WebSocket connections"
    ).unwrap();

    /// Number of unique connected users
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).unwrap();

    // ============================================================================
    // Room Metrics
    // ============================================================================

    /// Number of event rooms with at least one present user
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Number of event rooms with at least one present user"
    ).unwrap();

    /// Members per room
    pub static ref ROOM_MEMBERS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_room_members", METRIC_PREFIX),
        "Number of present users per event room",
        &["event_id"]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Total chat messages accepted for fan-out
    pub static ref CHAT_MESSAGES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_chat_messages_total", METRIC_PREFIX),
        "Total chat messages accepted for fan-out"
    ).unwrap();

    /// Chat messages rejected because the sender never joined the room
    pub static ref CHAT_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_chat_rejected_total", METRIC_PREFIX),
        "Chat messages rejected because the sender had not joined the room"
    ).unwrap();

    /// Total membership snapshots published
    pub static ref SNAPSHOTS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_snapshots_published_total", METRIC_PREFIX),
        "Total active-users membership snapshots published"
    ).unwrap();

    /// Total signals delivered to connections
    pub static ref DELIVERIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total signals delivered to connections"
    ).unwrap();

    /// Total per-connection delivery failures (swallowed, best-effort model)
    pub static ref DELIVERY_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total per-connection delivery failures"
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

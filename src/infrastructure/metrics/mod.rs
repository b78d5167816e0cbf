//! Prometheus Metrics Module
//!
//! Provides gateway-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauges
//! - Publish and fan-out counters
//! - Dropped frame counters by reason
//! - Distributed bus health (connected flag, reconnect count)

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Registered WebSocket connections. Connections enter the registry only
/// after a successful auth handshake, so this counts authenticated sockets.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "ws_connections_active",
            "Number of registered WebSocket connections",
        )
        .namespace("relay_gateway"),
    )
    .expect("Failed to create WS_CONNECTIONS_ACTIVE metric")
});

/// Messages accepted for publication, by origin ("local" or "bus")
pub static MESSAGES_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "messages_published_total",
            "Total messages accepted for publication",
        )
        .namespace("relay_gateway"),
        &["origin"],
    )
    .expect("Failed to create MESSAGES_PUBLISHED_TOTAL metric")
});

/// Frames delivered into per-connection outbound buffers
pub static FANOUT_DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "fanout_deliveries_total",
            "Total frames delivered to subscriber buffers",
        )
        .namespace("relay_gateway"),
    )
    .expect("Failed to create FANOUT_DELIVERIES_TOTAL metric")
});

/// Frames dropped before delivery, by reason ("slow_consumer", "closed")
pub static FRAMES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("frames_dropped_total", "Total frames dropped before delivery")
            .namespace("relay_gateway"),
        &["reason"],
    )
    .expect("Failed to create FRAMES_DROPPED_TOTAL metric")
});

/// Distributed bus connectivity flag (1 = connected, 0 = degraded)
pub static BUS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("bus_connected", "Distributed bus connectivity (1 = up)")
            .namespace("relay_gateway"),
    )
    .expect("Failed to create BUS_CONNECTED metric")
});

/// Bus reconnect attempts
pub static BUS_RECONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("bus_reconnects_total", "Total distributed bus reconnects")
            .namespace("relay_gateway"),
    )
    .expect("Failed to create BUS_RECONNECTS_TOTAL metric")
});

/// Channels currently known to the broker
pub static CHANNELS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("channels_active", "Channels currently held by the broker")
            .namespace("relay_gateway"),
    )
    .expect("Failed to create CHANNELS_ACTIVE metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WS_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_PUBLISHED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_PUBLISHED_TOTAL");
    registry
        .register(Box::new(FANOUT_DELIVERIES_TOTAL.clone()))
        .expect("Failed to register FANOUT_DELIVERIES_TOTAL");
    registry
        .register(Box::new(FRAMES_DROPPED_TOTAL.clone()))
        .expect("Failed to register FRAMES_DROPPED_TOTAL");
    registry
        .register(Box::new(BUS_CONNECTED.clone()))
        .expect("Failed to register BUS_CONNECTED");
    registry
        .register(Box::new(BUS_RECONNECTS_TOTAL.clone()))
        .expect("Failed to register BUS_RECONNECTS_TOTAL");
    registry
        .register(Box::new(CHANNELS_ACTIVE.clone()))
        .expect("Failed to register CHANNELS_ACTIVE");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to update WebSocket connection count
pub fn set_ws_connections(total: i64) {
    WS_CONNECTIONS_ACTIVE.set(total);
}

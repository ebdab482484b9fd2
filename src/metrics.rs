//! Metric helpers for `tapwire`.
//!
//! Thin wrappers around the [`metrics`](https://docs.rs/metrics) crate. With
//! the `metrics` cargo feature disabled every helper compiles to a no-op, so
//! call sites stay unconditional.

use crate::pipeline::Direction;

/// Name of the gauge tracking active sessions.
pub const SESSIONS_ACTIVE: &str = "tapwire_sessions_active";
/// Name of the counter tracking forwarded packets.
pub const PACKETS_FORWARDED: &str = "tapwire_packets_forwarded_total";
/// Name of the counter tracking packets dropped by handler failures.
pub const PACKETS_DROPPED: &str = "tapwire_packets_dropped_total";
/// Name of the counter tracking rejected connections.
pub const CONNECTIONS_REJECTED: &str = "tapwire_connections_rejected_total";

/// Increment the active sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Decrement the active sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a packet forwarded in the given direction.
pub fn inc_forwarded(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(PACKETS_FORWARDED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a packet dropped in the given direction.
pub fn inc_dropped(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(PACKETS_DROPPED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a connection rejected by access control.
pub fn inc_rejected() {
    #[cfg(feature = "metrics")]
    metrics::counter!(CONNECTIONS_REJECTED).increment(1);
}

//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Lifecycle state (`running`, `draining`, `stopped`).
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Broadcast payloads dropped to slow-consumer eviction so far.
    pub broadcast_drops: u64,
}

/// Build a health response from live counters.
#[must_use]
pub fn health_check(
    start_time: Instant,
    status: &str,
    connections: usize,
    broadcast_drops: u64,
) -> HealthResponse {
    HealthResponse {
        status: status.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        broadcast_drops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_state() {
        let resp = health_check(Instant::now(), "running", 0, 0);
        assert_eq!(resp.status, "running");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, "running", 0, 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counters_tracked() {
        let resp = health_check(Instant::now(), "running", 5, 2);
        assert_eq!(resp.connections, 5);
        assert_eq!(resp.broadcast_drops, 2);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), "draining", 2, 1);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "draining");
        assert_eq!(json["connections"], 2);
        assert_eq!(json["broadcast_drops"], 1);
        assert!(json["uptime_secs"].is_number());
    }
}

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubSnapshot;

/// Body of `GET /health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connections: usize,
    pub conversations: usize,
}

pub fn health_check(start_time: Instant, snapshot: HubSnapshot) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: snapshot.connections,
        conversations: snapshot.conversations,
    }
}

/// Reported when the hub task no longer answers.
pub fn hub_unavailable(start_time: Instant) -> HealthResponse {
    HealthResponse {
        status: "hub_unavailable",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: 0,
        conversations: 0,
    }
}

//! Settings types. Field names are camelCase in the settings file.

use std::collections::BTreeMap;
use std::time::Duration;

use relay_core::ConversationRetention;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub connection: ConnectionSettings,
    pub hub: HubSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::Malformed {
                key: "server.wsPath",
                value: self.server.ws_path.clone(),
                problem: "must start with '/'",
            });
        }
        let c = &self.connection;
        for (key, value, range) in [
            ("connection.maxFrameBytes", c.max_frame_bytes as u64, limits::MAX_FRAME_BYTES),
            ("connection.sendQueueCapacity", c.send_queue_capacity as u64, limits::SEND_QUEUE_CAPACITY),
            ("connection.pongWaitMs", c.pong_wait_ms, limits::PONG_WAIT_MS),
            ("connection.writeWaitMs", c.write_wait_ms, limits::WRITE_WAIT_MS),
            ("hub.eventQueueCapacity", self.hub.event_queue_capacity as u64, limits::EVENT_QUEUE_CAPACITY),
        ] {
            if !range.contains(&value) {
                return Err(SettingsError::OutOfRange {
                    key,
                    value,
                    min: *range.start(),
                    max: *range.end(),
                });
            }
        }
        Ok(())
    }
}

/// Accepted bounds, shared by the settings file and `RELAY_*` overrides.
pub mod limits {
    use std::ops::RangeInclusive;

    pub const MAX_FRAME_BYTES: RangeInclusive<u64> = 1..=16 * 1024 * 1024;
    pub const SEND_QUEUE_CAPACITY: RangeInclusive<u64> = 1..=1 << 20;
    pub const EVENT_QUEUE_CAPACITY: RangeInclusive<u64> = 1..=1 << 20;
    pub const PONG_WAIT_MS: RangeInclusive<u64> = 1_000..=3_600_000;
    pub const WRITE_WAIT_MS: RangeInclusive<u64> = 100..=600_000;
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Route that upgrades to the WebSocket channel.
    pub ws_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8880,
            ws_path: "/ws".to_string(),
        }
    }
}

/// Per-connection limits and deadlines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Largest inbound frame accepted; anything bigger drops the connection.
    pub max_frame_bytes: usize,
    /// Outbound frames buffered per connection before it is evicted.
    pub send_queue_capacity: usize,
    /// Read deadline, refreshed on every pong.
    pub pong_wait_ms: u64,
    /// Deadline for a single outbound write.
    pub write_wait_ms: u64,
}

impl ConnectionSettings {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Pings go out at 9/10 of the read deadline so a healthy peer's pong
    /// always lands before it expires.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: 512,
            send_queue_capacity: 256,
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of the single event stream feeding the hub.
    pub event_queue_capacity: usize,
    /// Conversation handling when a participant disconnects.
    pub retention: ConversationRetention,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            retention: ConversationRetention::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Per-target overrides, e.g. `{"relay_server::hub": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

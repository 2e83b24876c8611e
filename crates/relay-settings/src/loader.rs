//! Layering: defaults, then the settings file, then `RELAY_*` variables.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use relay_core::ConversationRetention;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{limits, RelaySettings};

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`RelaySettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Overlay `source` onto `target`. Objects merge key by key, a `null` keeps
/// the target's value, and anything else (arrays included) replaces it.
pub fn deep_merge(mut target: Value, source: Value) -> Value {
    overlay(&mut target, source);
    target
}

fn overlay(slot: &mut Value, layer: Value) {
    match (slot, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer.into_iter().filter(|(_, v)| !v.is_null()) {
                match base.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `RELAY_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("RELAY_PORT", |s| parse_range::<u16>(s, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("RELAY_WS_PATH") {
        settings.server.ws_path = v;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = env.parsed("RELAY_MAX_FRAME_BYTES", |s| parse_count(s, &limits::MAX_FRAME_BYTES)) {
        settings.connection.max_frame_bytes = v;
    }
    if let Some(v) = env.parsed("RELAY_SEND_QUEUE", |s| parse_count(s, &limits::SEND_QUEUE_CAPACITY)) {
        settings.connection.send_queue_capacity = v;
    }
    if let Some(v) = env.parsed("RELAY_PONG_WAIT_MS", |s| parse_within(s, &limits::PONG_WAIT_MS)) {
        settings.connection.pong_wait_ms = v;
    }
    if let Some(v) = env.parsed("RELAY_WRITE_WAIT_MS", |s| parse_within(s, &limits::WRITE_WAIT_MS)) {
        settings.connection.write_wait_ms = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.parsed("RELAY_RETENTION", parse_retention) {
        settings.hub.retention = v;
    }

    // ── Logging / metrics ───────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("RELAY_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
    if let Some(v) = env.parsed("RELAY_METRICS", parse_bool) {
        settings.metrics.enabled = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number within an inclusive range.
pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_within(val: &str, range: &RangeInclusive<u64>) -> Option<u64> {
    parse_range(val, *range.start(), *range.end())
}

fn parse_count(val: &str, range: &RangeInclusive<u64>) -> Option<usize> {
    parse_within(val, range).and_then(|n| usize::try_from(n).ok())
}

/// Parse a retention policy name (`drop_on_disconnect`, `drop_when_offline`, `retain`).
pub fn parse_retention(val: &str) -> Option<ConversationRetention> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

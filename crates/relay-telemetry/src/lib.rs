pub mod metrics;

use metrics_exporter_prometheus::PrometheusHandle;
use relay_settings::{LoggingSettings, RelaySettings};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relay_server::hub" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of text.
    pub json: bool,
    /// Whether to install the Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from loaded settings. Unparseable level names fall back to INFO
    /// (global) or are skipped (per-module).
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let LoggingSettings {
            level,
            json,
            modules,
        } = &settings.logging;
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            module_levels: modules
                .iter()
                .filter_map(|(module, level)| Some((module.clone(), level.parse().ok()?)))
                .collect(),
            json: *json,
            metrics_enabled: settings.metrics.enabled,
        }
    }

    /// Filter directive equivalent to this config, e.g. `info,relay_server=debug`.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Keeps telemetry handles alive for the life of the process.
pub struct TelemetryGuard {
    prometheus: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    /// Handle used to render `/metrics`, when metrics are enabled.
    pub fn prometheus(&self) -> Option<&PrometheusHandle> {
        self.prometheus.as_ref()
    }
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("relay-telemetry: subscriber already installed: {e}");
    }

    let prometheus = if config.metrics_enabled {
        match metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to install metrics recorder");
                None
            }
        }
    } else {
        None
    };

    TelemetryGuard { prometheus }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_includes_modules() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("relay_server::hub".into(), Level::DEBUG)],
            ..TelemetryConfig::default()
        };
        assert_eq!(config.filter_directive(), "warn,relay_server::hub=debug");
    }

    #[test]
    fn from_settings_parses_levels() {
        let mut settings = RelaySettings::default();
        settings.logging.level = "debug".into();
        settings.logging.json = true;
        settings
            .logging
            .modules
            .insert("relay_server".into(), "trace".into());
        settings.logging.modules.insert("noisy".into(), "loud".into());
        settings.metrics.enabled = false;

        let config = TelemetryConfig::from_settings(&settings);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.module_levels, vec![("relay_server".to_string(), Level::TRACE)]);
        assert!(config.json);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn bad_global_level_falls_back_to_info() {
        let mut settings = RelaySettings::default();
        settings.logging.level = "chatty".into();
        assert_eq!(TelemetryConfig::from_settings(&settings).log_level, Level::INFO);
    }
}

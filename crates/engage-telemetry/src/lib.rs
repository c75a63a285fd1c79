mod metrics;

pub use metrics::{HistogramSummary, MetricSample, MetricType, MetricsRecorder};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "engage_pipeline" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
    /// Whether metrics recording is enabled.
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
    /// Build from a textual level such as `"debug"`; unknown levels fall back to INFO.
    pub fn with_level_str(mut self, level: &str) -> Self {
        self.log_level = level.parse().unwrap_or(Level::INFO);
        self
    }

    /// The `EnvFilter` directive string for this config.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Handle returned by [`init_telemetry`]; keeps the metrics recorder alive.
pub struct TelemetryGuard {
    base_level: Level,
    metrics_recorder: Option<Arc<MetricsRecorder>>,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    reload_handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let mut levels = self.level_filter.write();
        if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            levels.push((module.to_string(), level));
        }

        if let Some(handle) = &self.reload_handle {
            let directives = TelemetryConfig {
                log_level: self.base_level,
                module_levels: levels.clone(),
                ..Default::default()
            }
            .filter_directives();
            if let Err(e) = handle.reload(EnvFilter::new(directives)) {
                tracing::warn!(error = %e, "failed to reload log filter");
            }
        }
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }

    /// Shared metrics recorder, if metrics are enabled.
    pub fn metrics(&self) -> Option<Arc<MetricsRecorder>> {
        self.metrics_recorder.clone()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// Installing the global subscriber fails if one is already set (for example
/// when a test harness installed its own); that is reported on stderr and the
/// existing subscriber stays in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));

    let filter_str = config.filter_directives();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
    let reload_handle = match installed {
        Ok(()) => Some(reload_handle),
        Err(e) => {
            eprintln!("engage-telemetry: subscriber already installed: {e}");
            None
        }
    };

    let metrics_recorder = config
        .metrics_enabled
        .then(|| Arc::new(MetricsRecorder::new()));

    TelemetryGuard {
        base_level: config.log_level,
        metrics_recorder,
        level_filter,
        reload_handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directives_include_module_overrides() {
        let config = TelemetryConfig {
            module_levels: vec![("engage_pipeline".into(), Level::DEBUG)],
            ..Default::default()
        };
        assert_eq!(config.filter_directives(), "info,engage_pipeline=debug");
    }

    #[test]
    fn level_str_parsing() {
        let config = TelemetryConfig::default().with_level_str("warn");
        assert_eq!(config.log_level, Level::WARN);
        let fallback = TelemetryConfig::default().with_level_str("chatty");
        assert_eq!(fallback.log_level, Level::INFO);
    }

    #[test]
    fn guard_tracks_module_levels_and_metrics() {
        let guard = init_telemetry(TelemetryConfig::default());
        guard.set_module_level("engage_client", Level::TRACE);
        guard.set_module_level("engage_client", Level::WARN);
        assert_eq!(guard.module_levels(), vec![("engage_client".to_string(), Level::WARN)]);
        assert!(guard.metrics().is_some());

        // A second init must not panic.
        let second = init_telemetry(TelemetryConfig {
            metrics_enabled: false,
            ..Default::default()
        });
        assert!(second.metrics().is_none());
    }
}

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values; `#[serde(default)]` lets a settings
//! file carry only the fields it overrides.

mod loader;

pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, parse_bool,
    parse_u64_range, settings_path,
};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings for the `engage` binary.
///
/// ```json
/// {
///   "accountId": "1234",
///   "applicationId": "app-abc",
///   "pipeline": { "debounceMs": 5000 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngageSettings {
    /// Account that owns all activity.
    pub account_id: String,
    /// Application id reported in auto properties.
    pub application_id: String,
    /// Base URL of the activity-ingest API.
    pub api_host: String,
    /// Request timeout for activity delivery, milliseconds.
    pub request_timeout_ms: u64,
    pub pipeline: PipelineSettings,
    pub session: SessionSettings,
    pub device: DeviceSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for EngageSettings {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            application_id: String::new(),
            api_host: "https://api.engage.example".to_string(),
            request_timeout_ms: 15_000,
            pipeline: PipelineSettings::default(),
            session: SessionSettings::default(),
            device: DeviceSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl EngageSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Debounce window for deferred admissions.
    pub debounce_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { debounce_ms: 10_000 }
    }
}

impl PipelineSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Idle time after which the next intent starts a new session.
    pub timeout_secs: u64,
    /// Whether anonymous intents may start a session with a generated user id.
    pub allow_anonymous: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            allow_anonymous: true,
        }
    }
}

/// Device and build facts reported as auto properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    pub sdk_version: String,
    pub app_version: String,
    pub operating_system: String,
    pub device_type: String,
    pub locale: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            app_version: String::new(),
            operating_system: std::env::consts::OS.to_string(),
            device_type: "desktop".to_string(),
            locale: "en-US".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default log level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

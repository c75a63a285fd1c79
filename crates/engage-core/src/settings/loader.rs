//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`EngageSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::EngageSettings;
use crate::errors::SettingsError;

/// Resolve the default settings path (`~/.engage/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".engage").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<EngageSettings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<EngageSettings, SettingsError> {
    let defaults = serde_json::to_value(EngageSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: EngageSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut EngageSettings) {
    if let Some(v) = read_env_string("ENGAGE_ACCOUNT_ID") {
        settings.account_id = v;
    }
    if let Some(v) = read_env_string("ENGAGE_APPLICATION_ID") {
        settings.application_id = v;
    }
    if let Some(v) = read_env_string("ENGAGE_API_HOST") {
        settings.api_host = v;
    }
    if let Some(v) = read_env_u64("ENGAGE_DEBOUNCE_MS", 1, 600_000) {
        settings.pipeline.debounce_ms = v;
    }
    if let Some(v) = read_env_u64("ENGAGE_SESSION_TIMEOUT_SECS", 1, 86_400) {
        settings.session.timeout_secs = v;
    }
    if let Some(v) = read_env_bool("ENGAGE_ALLOW_ANONYMOUS") {
        settings.session.allow_anonymous = v;
    }
    if let Some(v) = read_env_string("ENGAGE_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
}

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_nested_override() {
        let target = json!({ "pipeline": { "debounceMs": 10000 }, "accountId": "a" });
        let source = json!({ "pipeline": { "debounceMs": 500 } });
        let merged = deep_merge(target, source);
        assert_eq!(merged["pipeline"]["debounceMs"], 500);
        assert_eq!(merged["accountId"], "a");
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(json!({ "items": [1, 2, 3] }), json!({ "items": [4] }));
        assert_eq!(merged["items"], json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({ "a": 1, "b": 2 }), json!({ "a": null }));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({ "a": { "nested": true } }), json!({ "a": 42 }));
        assert_eq!(merged["a"], 42);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.pipeline, EngageSettings::default().pipeline);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"accountId": "acct-9", "pipeline": {"debounceMs": 2500}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.account_id, "acct-9");
        assert_eq!(settings.pipeline.debounce_ms, 2500);
        assert_eq!(settings.session.timeout_secs, 1800);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn parse_bool_variants() {
        for yes in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(yes), Some(true), "{yes}");
        }
        for no in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(no), Some(false), "{no}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("500", 1, 600_000), Some(500));
        assert_eq!(parse_u64_range("0", 1, 600_000), None);
        assert_eq!(parse_u64_range("600001", 1, 600_000), None);
        assert_eq!(parse_u64_range("-3", 1, 10), None);
        assert_eq!(parse_u64_range("ten", 1, 10), None);
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChimeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `CHIME_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ChimeSettings, MAX_TIMING_MS, MIN_TIMING_MS};

/// Directory holding Chime's settings and database (`~/.chime`).
pub fn chime_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chime")
}

/// Resolve the default settings file path (`~/.chime/settings.json`).
pub fn settings_path() -> PathBuf {
    chime_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChimeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChimeSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults with the file merged on top, without env overrides.
fn load_file_layer(path: &Path) -> Result<ChimeSettings> {
    let defaults = serde_json::to_value(ChimeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
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
/// Numbers must parse and fall within range; invalid values are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut ChimeSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
fn apply_overrides(settings: &mut ChimeSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CHIME_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("CHIME_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("CHIME_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("CHIME_READ_IDLE_TIMEOUT_MS", MIN_TIMING_MS, MAX_TIMING_MS) {
        settings.server.read_idle_timeout_ms = v;
    }
    if let Some(v) = env.u64("CHIME_PING_INTERVAL_MS", MIN_TIMING_MS, MAX_TIMING_MS) {
        settings.server.ping_interval_ms = v;
    }

    // ── Generation ──────────────────────────────────────────────────
    if let Some(v) = env.string("CHIME_GENERATION_APP_ID") {
        settings.generation.app_id = v;
    }
    if let Some(v) = env.string("CHIME_GENERATION_API_KEY") {
        settings.generation.api_key = v;
    }
    if let Some(v) = env.string("CHIME_GENERATION_API_URL") {
        settings.generation.api_url = v;
    }

    // ── Synthesis ───────────────────────────────────────────────────
    if let Some(v) = env.string("CHIME_SYNTHESIS_API_KEY") {
        settings.synthesis.api_key = v;
    }
    if let Some(v) = env.string("CHIME_SYNTHESIS_API_URL") {
        settings.synthesis.api_url = v;
    }
    if let Some(v) = env.string("CHIME_SYNTHESIS_VOICE") {
        settings.synthesis.voice = v;
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = env.string("CHIME_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = env.u64("CHIME_RETENTION_DAYS", 1, 36_500) {
        settings.storage.retention_days = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.string("CHIME_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("CHIME_WELCOME_MESSAGE") {
        settings.welcome_message = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers (thin wrappers) ────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, |v| parse_usize_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"server": {"port": 8080, "host": "0.0.0.0"}});
        let source = json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null, "b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn deep_merge_replaces_arrays_and_primitives() {
        let merged = deep_merge(json!({"a": [1, 2], "b": "x"}), json!({"a": [3], "b": "y"}));
        assert_eq!(merged, json!({"a": [3], "b": "y"}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 8080);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":9100},"generation":{"appId":"a1"},"welcomeMessage":"Hi!"}"#,
        )
        .unwrap();
        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.write_timeout_ms, 10_000);
        assert_eq!(s.generation.app_id, "a1");
        assert_eq!(s.welcome_message, "Hi!");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_file_layer(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let env = vars(&[
            ("CHIME_PORT", "7000"),
            ("CHIME_HOST", "127.0.0.1"),
            ("CHIME_GENERATION_API_KEY", "sk-1"),
            ("CHIME_RETENTION_DAYS", "7"),
        ]);
        let mut s = ChimeSettings::default();
        apply_overrides(&mut s, |k| env.get(k).cloned());
        assert_eq!(s.server.port, 7000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.generation.api_key, "sk-1");
        assert_eq!(s.storage.retention_days, 7);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let env = vars(&[
            ("CHIME_PORT", "0"),
            ("CHIME_READ_IDLE_TIMEOUT_MS", "soon"),
            ("CHIME_HOST", ""),
        ]);
        let mut s = ChimeSettings::default();
        apply_overrides(&mut s, |k| env.get(k).cloned());
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.read_idle_timeout_ms, 60_000);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("999", 1000, 2000), None);
        assert_eq!(parse_usize_range("12", 1, 100), Some(12));
        assert_eq!(parse_usize_range("-1", 1, 100), None);
    }
}

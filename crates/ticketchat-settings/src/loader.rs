//! Layered settings loading.
//!
//! Defaults are serialized to JSON, the user file is deep-merged over them,
//! the result is deserialized, `TICKETCHAT_*` variables are applied, and the
//! final value is validated. See [`deep_merge`] for the merge rules.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ChatSettings;

/// Resolve the path to the settings file (`~/.ticketchat/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ticketchat").join("settings.json")
}

/// Load `~/.ticketchat/settings.json` plus environment overrides.
pub fn load_settings() -> Result<ChatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load the settings file at `path` plus environment overrides.
///
/// A missing file means defaults. An unreadable or malformed file is an
/// error, and so is a merged result that fails validation.
pub fn load_settings_from_path(path: &Path) -> Result<ChatSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<ChatSettings> {
    let defaults = serde_json::to_value(ChatSettings::default())?;

    let merged = if path.exists() {
        debug!(path = %path.display(), "reading settings file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
        defaults
    };

    let mut settings: ChatSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` over `target`.
///
/// Objects merge key by key. A null in `source` keeps the target value;
/// anything else in `source` replaces the target value outright.
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

/// Apply `TICKETCHAT_*` overrides read through `env`.
///
/// A value that does not parse or is out of range is logged and skipped.
fn apply_overrides(settings: &mut ChatSettings, env: impl Fn(&str) -> Option<String>) {
    let read = EnvReader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read.string("TICKETCHAT_API_URL") {
        settings.server.api_base_url = v;
    }
    if let Some(v) = read.string("TICKETCHAT_WS_URL") {
        settings.server.ws_base_url = v;
    }
    if let Some(v) = read.u64("TICKETCHAT_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.server.request_timeout_ms = v;
    }
    if let Some(v) = read.string("TICKETCHAT_AUTH_TOKEN") {
        settings.server.auth_token = Some(v);
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = read.u64("TICKETCHAT_MAX_ATTEMPTS", 1, 100) {
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.reconnect.max_attempts = attempts;
    }
    if let Some(v) = read.u64("TICKETCHAT_BASE_DELAY_MS", 1, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read.u64("TICKETCHAT_MAX_DELAY_MS", 1, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = read.u64("TICKETCHAT_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.reconnect.connect_timeout_ms = v;
    }

    // ── Notifications ───────────────────────────────────────────────
    if let Some(v) = read.bool("TICKETCHAT_NOTIFICATIONS") {
        settings.notifications.enabled = v;
    }
    if let Some(v) = read.u64("TICKETCHAT_PREVIEW_CHARS", 1, 10_000) {
        #[allow(clippy::cast_possible_truncation)]
        let chars = v as usize;
        settings.notifications.preview_chars = chars;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read.string("TICKETCHAT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read.bool("TICKETCHAT_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// On/off switch: `1`, `true`, `yes`, `on` and their negatives, any case.
pub fn parse_flag(val: &str) -> Option<bool> {
    let val = val.trim().to_ascii_lowercase();
    if ["1", "true", "yes", "on"].contains(&val.as_str()) {
        Some(true)
    } else if ["0", "false", "no", "off"].contains(&val.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Unsigned integer inside `min..=max`.
pub fn parse_bounded(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim().parse::<u64>().ok().filter(|n| (min..=max).contains(n))
}

struct EnvReader<F> {
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let parsed = parse_flag(&val);
        if parsed.is_none() {
            warn!(var = name, value = %val, "expected on/off, ignoring override");
        }
        parsed
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let parsed = parse_bounded(&val, min, max);
        if parsed.is_none() {
            warn!(var = name, value = %val, min, max, "expected a number in range, ignoring override");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! # ticketchat-settings
//!
//! Configuration management with layered sources for ticket chat.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChatSettings::default()`]
//! 2. **User file**: `~/.ticketchat/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TICKETCHAT_*` overrides (highest priority)
//!
//! There is no global instance: the binary loads settings once and hands the
//! relevant sections to each session.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ChatSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = ChatSettings::default();
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.reconnect.base_delay_ms, 1000);
        assert_eq!(settings.reconnect.max_delay_ms, 10_000);
        assert_eq!(settings.notifications.preview_chars, 80);
        assert_eq!(settings.logging.level, "warn");
        assert!(settings.validate().is_ok());
    }
}

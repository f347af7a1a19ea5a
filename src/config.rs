//! Host configuration.
//!
//! Resolution order: built-in defaults, then the optional JSON file named by
//! `HEARTH_CONFIG`, then `HEARTH_*` environment variables (a `.env` file is
//! honored). The merged result is validated before any component is built.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "HEARTH_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Pre-issued bearer token used by the static token provider.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_auth_provider")]
    pub auth_provider: String,
    #[serde(default = "default_auth_profile")]
    pub auth_profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_calendar_refresh_secs")]
    pub calendar_refresh_secs: u64,
    #[serde(default = "default_photo_refresh_secs")]
    pub photo_refresh_secs: u64,
    /// Lifetime the backend grants signed photo URLs.
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    /// When to regenerate signed URLs; must be shorter than their lifetime.
    #[serde(default = "default_signed_url_refresh_secs")]
    pub signed_url_refresh_secs: u64,
    #[serde(default = "default_calendar_days_behind")]
    pub calendar_days_behind: u32,
    #[serde(default = "default_calendar_days_ahead")]
    pub calendar_days_ahead: u32,
    #[serde(default = "default_photo_limit")]
    pub photo_limit: usize,
    #[serde(default)]
    pub photo_folder: Option<String>,
    #[serde(default = "default_expected_widgets")]
    pub expected_widgets: Vec<String>,
    #[serde(default = "default_widget_wait_timeout_ms")]
    pub widget_wait_timeout_ms: u64,
    #[serde(default = "default_widget_min_wait_ms")]
    pub widget_min_wait_ms: u64,
    /// Defer all data loading until the host releases the data manager.
    #[serde(default = "default_true")]
    pub manual_trigger: bool,
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
    #[serde(default = "default_theme")]
    pub default_theme: String,
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_true() -> bool {
    true
}

fn default_calendar_refresh_secs() -> u64 {
    5 * 60
}

fn default_photo_refresh_secs() -> u64 {
    30 * 60
}

fn default_signed_url_ttl_secs() -> u64 {
    60 * 60
}

fn default_signed_url_refresh_secs() -> u64 {
    50 * 60
}

fn default_calendar_days_behind() -> u32 {
    7
}

fn default_calendar_days_ahead() -> u32 {
    30
}

fn default_photo_limit() -> usize {
    100
}

fn default_widget_wait_timeout_ms() -> u64 {
    10_000
}

fn default_widget_min_wait_ms() -> u64 {
    1_000
}

fn default_max_listeners() -> usize {
    crate::bus::DEFAULT_MAX_LISTENERS
}

fn default_theme() -> String {
    "dark".to_string()
}

fn default_token_ttl_secs() -> u64 {
    60 * 60
}

fn default_bucket() -> String {
    "photos".to_string()
}

fn default_backend_timeout_ms() -> u64 {
    15_000
}

fn default_auth_provider() -> String {
    "google".to_string()
}

fn default_auth_profile() -> String {
    "default".to_string()
}

fn default_expected_widgets() -> Vec<String> {
    ["calendar", "photos", "clock"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            access_token: None,
            access_token_ttl_secs: default_token_ttl_secs(),
            bucket: default_bucket(),
            timeout_ms: default_backend_timeout_ms(),
            auth_provider: default_auth_provider(),
            auth_profile: default_auth_profile(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            calendar_refresh_secs: default_calendar_refresh_secs(),
            photo_refresh_secs: default_photo_refresh_secs(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            signed_url_refresh_secs: default_signed_url_refresh_secs(),
            calendar_days_behind: default_calendar_days_behind(),
            calendar_days_ahead: default_calendar_days_ahead(),
            photo_limit: default_photo_limit(),
            photo_folder: None,
            expected_widgets: default_expected_widgets(),
            widget_wait_timeout_ms: default_widget_wait_timeout_ms(),
            widget_min_wait_ms: default_widget_min_wait_ms(),
            manual_trigger: true,
            max_listeners: default_max_listeners(),
            default_theme: default_theme(),
            backend: BackendConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Defaults, file, environment, validation.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse("HEARTH_CALENDAR_REFRESH_SECS") {
            self.calendar_refresh_secs = value;
        }
        if let Some(value) = env_parse("HEARTH_PHOTO_REFRESH_SECS") {
            self.photo_refresh_secs = value;
        }
        if let Some(value) = env_parse("HEARTH_PHOTO_LIMIT") {
            self.photo_limit = value;
        }
        if let Some(value) = env_string("HEARTH_PHOTO_FOLDER") {
            self.photo_folder = Some(value);
        }
        if let Some(value) = env_string("HEARTH_EXPECTED_WIDGETS") {
            self.expected_widgets = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = env_parse("HEARTH_WIDGET_WAIT_TIMEOUT_MS") {
            self.widget_wait_timeout_ms = value;
        }
        if let Some(value) = env_parse("HEARTH_MANUAL_TRIGGER") {
            self.manual_trigger = value;
        }
        if let Some(value) = env_string("HEARTH_THEME") {
            self.default_theme = value;
        }
        if let Some(value) = env_string("HEARTH_BACKEND_URL") {
            self.backend.base_url = Some(value);
        }
        if let Some(value) = env_string("HEARTH_BACKEND_API_KEY") {
            self.backend.api_key = Some(value);
        }
        if let Some(value) = env_string("HEARTH_ACCESS_TOKEN") {
            self.backend.access_token = Some(value);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calendar_refresh_secs == 0 {
            return Err(invalid("calendar_refresh_secs", "must be greater than 0"));
        }
        if self.photo_refresh_secs == 0 {
            return Err(invalid("photo_refresh_secs", "must be greater than 0"));
        }
        if self.signed_url_refresh_secs == 0
            || self.signed_url_refresh_secs >= self.signed_url_ttl_secs
        {
            return Err(invalid(
                "signed_url_refresh_secs",
                format!(
                    "must be between 1 and the signed URL lifetime ({}s)",
                    self.signed_url_ttl_secs
                ),
            ));
        }
        if self.photo_limit == 0 {
            return Err(invalid("photo_limit", "must be greater than 0"));
        }
        if self.default_theme.trim().is_empty() {
            return Err(invalid("default_theme", "cannot be empty"));
        }
        if self.backend.timeout_ms == 0 {
            return Err(invalid("backend.timeout_ms", "must be greater than 0"));
        }
        if let Some(url) = self.backend.base_url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("backend.base_url", format!("not an http(s) url: {url}")));
            }
        }
        Ok(())
    }

    pub fn calendar_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.calendar_refresh_secs)
    }

    pub fn photo_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.photo_refresh_secs)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn signed_url_refresh(&self) -> Duration {
        Duration::from_secs(self.signed_url_refresh_secs)
    }

    pub fn widget_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.widget_wait_timeout_ms)
    }

    pub fn widget_min_wait(&self) -> Duration {
        Duration::from_millis(self.widget_min_wait_ms)
    }

    pub fn calendar_window(&self) -> (Duration, Duration) {
        const DAY: u64 = 24 * 60 * 60;
        (
            Duration::from_secs(self.calendar_days_behind as u64 * DAY),
            Duration::from_secs(self.calendar_days_ahead as u64 * DAY),
        )
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_refresh_policy() {
        let config = DashboardConfig::default();
        assert_eq!(config.calendar_refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.photo_refresh_interval(), Duration::from_secs(1800));
        assert_eq!(config.signed_url_refresh(), Duration::from_secs(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: DashboardConfig = serde_json::from_str(
            r#"{ "photo_limit": 12, "backend": { "base_url": "https://db.example.com" } }"#,
        )
        .unwrap();
        assert_eq!(config.photo_limit, 12);
        assert_eq!(config.backend.bucket, "photos");
        assert_eq!(config.expected_widgets, vec!["calendar", "photos", "clock"]);
        assert!(config.manual_trigger);
    }

    #[test]
    fn signed_url_refresh_must_precede_expiry() {
        let config = DashboardConfig {
            signed_url_refresh_secs: 3600,
            ..DashboardConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "signed_url_refresh_secs",
                ..
            }
        ));
    }

    #[test]
    fn non_http_backend_url_is_rejected() {
        let mut config = DashboardConfig::default();
        config.backend.base_url = Some("ftp://files".to_string());
        assert!(config.validate().is_err());
    }
}

//! Configuration management for the alert engine
//!
//! A small TOML file covers the two alert tunables and the optional
//! dashboard base URL used for deep links. The tunables are exposed to the
//! dispatcher through [`SettingsHandle`], which re-reads on every
//! evaluation so the dashboard's settings service can change them live.

use crate::error::ConfigError;
use crate::store::AlertSettings;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub alerts: AlertsConfig,
    pub dashboard: DashboardConfig,
}

/// Alert throttling tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    /// Flap-suppression cooldown in minutes; zero or negative disables it
    pub cooldown_minutes: i64,
    /// Per-team cap on dispatched alerts within a sliding hour
    pub max_per_hour: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 15,
            max_per_hour: 20,
        }
    }
}

/// Dashboard integration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL of the dashboard UI; enables deep links in notifications
    pub base_url: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check the configuration
    ///
    /// Throttle values are never fatal: a zero cap legitimately means
    /// "suppress everything" and a non-positive cooldown disables flap
    /// suppression. Both only warn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alerts.max_per_hour == 0 {
            warn!("alerts.max_per_hour is 0; every alert will be rate limited");
        }
        if self.alerts.cooldown_minutes <= 0 {
            warn!(
                "alerts.cooldown_minutes is {}; flap suppression is disabled",
                self.alerts.cooldown_minutes
            );
        }

        if let Some(base_url) = &self.dashboard.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "dashboard.base_url must be an http(s) URL, got '{}'",
                    base_url
                )));
            }
        }

        Ok(())
    }
}

/// Live-reconfigurable view of the alert tunables
///
/// Implements the [`AlertSettings`] collaborator seam. Cloning shares the
/// underlying values, so the composition root can hand one clone to the
/// dispatcher and keep another for the settings service to update.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<AlertsConfig>>,
}

impl SettingsHandle {
    pub fn new(alerts: AlertsConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(alerts)),
        }
    }

    /// Replace the tunables; takes effect on the next evaluation
    pub fn update(&self, alerts: AlertsConfig) {
        *self.inner.write().unwrap() = alerts;
    }

    /// Current tunable values
    pub fn snapshot(&self) -> AlertsConfig {
        self.inner.read().unwrap().clone()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(AlertsConfig::default())
    }
}

impl AlertSettings for SettingsHandle {
    fn cooldown_minutes(&self) -> i64 {
        self.inner.read().unwrap().cooldown_minutes
    }

    fn max_alerts_per_hour(&self) -> u32 {
        self.inner.read().unwrap().max_per_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.alerts.cooldown_minutes, 15);
        assert_eq!(config.alerts.max_per_hour, 20);
        assert_eq!(config.dashboard.base_url, None);
    }

    #[test]
    fn test_from_toml_full() {
        let config = Config::from_toml(
            r#"
            [alerts]
            cooldown_minutes = 5
            max_per_hour = 3

            [dashboard]
            base_url = "https://status.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.alerts.cooldown_minutes, 5);
        assert_eq!(config.alerts.max_per_hour, 3);
        assert_eq!(
            config.dashboard.base_url.as_deref(),
            Some("https://status.example.com")
        );
    }

    #[test]
    fn test_from_toml_partial_falls_back_to_defaults() {
        let config = Config::from_toml(
            r#"
            [alerts]
            cooldown_minutes = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.alerts.cooldown_minutes, 1);
        assert_eq!(config.alerts.max_per_hour, 20);
    }

    #[test]
    fn test_from_toml_rejects_invalid_syntax() {
        assert!(matches!(
            Config::from_toml("not valid toml ["),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let result = Config::from_toml(
            r#"
            [dashboard]
            base_url = "status.example.com"
            "#,
        );

        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_zero_cap_is_legal() {
        let config = Config::from_toml(
            r#"
            [alerts]
            max_per_hour = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.alerts.max_per_hour, 0);
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[alerts]\ncooldown_minutes = 7").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.alerts.cooldown_minutes, 7);
    }

    #[test]
    fn test_from_file_missing_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/klaxon.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_settings_handle_updates_are_visible_to_clones() {
        let handle = SettingsHandle::default();
        let dispatcher_view = handle.clone();
        assert_eq!(dispatcher_view.cooldown_minutes(), 15);

        handle.update(AlertsConfig {
            cooldown_minutes: 0,
            max_per_hour: 1,
        });

        assert_eq!(dispatcher_view.cooldown_minutes(), 0);
        assert_eq!(dispatcher_view.max_alerts_per_hour(), 1);
    }
}

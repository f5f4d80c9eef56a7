//! TOML-based application configuration.
//!
//! Holds the operational knobs of the ledger, not the reward amounts
//! (those live in the database, see [`crate::reward_config`]):
//! - The fixed time zone used for calendar-day boundaries
//! - The optimistic-commit retry budget
//! - The weekly sweeper schedule and page size
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use std::path::PathBuf;

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::optimistic::RetryPolicy;
use crate::calendar::BusinessCalendar;
use crate::error::ConfigError;

/// Calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Offset east of UTC applied to every user when deriving calendar days.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Retry budget for optimistic commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Weekly sweeper schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Wall-clock time (`HH:MM`, in the calendar time zone) of the daily run.
    #[serde(default = "default_run_at")]
    pub run_at: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

fn default_max_attempts() -> u32 {
    8
}
fn default_min_delay_ms() -> u64 {
    5
}
fn default_max_delay_ms() -> u64 {
    250
}
fn default_run_at() -> String {
    "00:05".into()
}
fn default_page_size() -> u32 {
    200
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
            page_size: default_page_size(),
        }
    }
}

impl AppConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Number(_) => value
                        .parse::<i64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as integer")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid("cannot replace a table".into()))
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing the defaults if the file doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: AppConfig =
                    toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default application config");
            Self::default()
        })
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.clone(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed
    /// or fails validation, or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let updated = self.with_value(key, value)?;
        updated.save()?;
        *self = updated;
        Ok(())
    }

    fn with_value(&self, key: &str, value: &str) -> Result<Self, ConfigError> {
        let mut json = serde_json::to_value(self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: AppConfig =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        Ok(updated)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.calendar()?;
        self.sweep_time()?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.sweeper.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sweeper.page_size".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The business calendar for the configured offset.
    ///
    /// # Errors
    /// Returns an error if the offset is outside ±24h.
    pub fn calendar(&self) -> Result<BusinessCalendar, ConfigError> {
        self.calendar
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(BusinessCalendar::new)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "calendar.utc_offset_minutes".into(),
                message: format!("{} is out of range", self.calendar.utc_offset_minutes),
            })
    }

    /// The daily sweep time.
    ///
    /// # Errors
    /// Returns an error if `sweeper.run_at` is not `HH:MM`.
    pub fn sweep_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.sweeper.run_at, "%H:%M").map_err(|e| {
            ConfigError::InvalidValue {
                key: "sweeper.run_at".into(),
                message: e.to_string(),
            }
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            min_delay_ms: self.retry.min_delay_ms,
            max_delay_ms: self.retry.max_delay_ms.max(self.retry.min_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.calendar.utc_offset_minutes, 0);
        assert_eq!(parsed.retry.max_attempts, 8);
        assert_eq!(parsed.sweeper.run_at, "00:05");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[calendar]\nutc_offset_minutes = 540\n").unwrap();
        assert_eq!(parsed.calendar.utc_offset_minutes, 540);
        assert_eq!(parsed.sweeper.page_size, 200);
        assert_eq!(parsed.retry.max_delay_ms, 250);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.get("retry.max_attempts").as_deref(), Some("8"));
        assert_eq!(cfg.get("sweeper.run_at").as_deref(), Some("00:05"));
        assert!(cfg.get("sweeper.missing").is_none());
    }

    #[test]
    fn with_value_updates_nested_number() {
        let cfg = AppConfig::default()
            .with_value("calendar.utc_offset_minutes", "-300")
            .unwrap();
        assert_eq!(cfg.calendar.utc_offset_minutes, -300);
    }

    #[test]
    fn with_value_rejects_unknown_key() {
        let err = AppConfig::default()
            .with_value("sweeper.nonexistent", "1")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));
    }

    #[test]
    fn with_value_rejects_invalid_values() {
        let cfg = AppConfig::default();
        assert!(cfg.with_value("retry.max_attempts", "lots").is_err());
        assert!(cfg.with_value("retry.max_attempts", "0").is_err());
        assert!(cfg.with_value("sweeper.run_at", "25:99").is_err());
        assert!(cfg
            .with_value("calendar.utc_offset_minutes", "100000")
            .is_err());
    }

    #[test]
    fn retry_policy_keeps_delays_ordered() {
        let mut cfg = AppConfig::default();
        cfg.retry.min_delay_ms = 500;
        cfg.retry.max_delay_ms = 10;
        let policy = cfg.retry_policy();
        assert_eq!(policy.min_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 500);
    }
}

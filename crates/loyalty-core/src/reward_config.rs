//! Live-tunable reward parameters.
//!
//! The configuration is a single JSON document in the `kv` table. Readers
//! take an immutable snapshot per operation through [`ConfigStore::get`],
//! which never fails: a missing or unreadable document yields the built-in
//! defaults. Admins change it through [`ConfigStore::update`], a field-level
//! merge that is validated before anything is written.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ValidationError};
use crate::storage::Database;

const CONFIG_KEY: &str = "reward_config";

/// Daily login bonus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyConfig {
    #[serde(default = "default_base_reward")]
    pub base_reward: i64,
    #[serde(default = "default_streak_bonus_increment")]
    pub streak_bonus_increment: i64,
    #[serde(default = "default_max_streak_bonus")]
    pub max_streak_bonus: i64,
}

/// Weekly streak bonus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyConfig {
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,
    #[serde(default = "default_weekly_bonus")]
    pub bonus: i64,
}

/// A one-time reward for crossing a lifetime-spend threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub threshold: i64,
    pub reward: i64,
}

/// A calendar date (`MM-DD`) whose daily bonus is multiplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialDay {
    pub month_day: String,
    pub multiplier: f64,
    pub name: String,
}

/// The full reward configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardConfig {
    #[serde(default)]
    pub daily: DailyConfig,
    #[serde(default)]
    pub weekly: WeeklyConfig,
    /// Sorted ascending by threshold.
    #[serde(default = "default_milestones")]
    pub milestones: Vec<Milestone>,
    #[serde(default = "default_special_days")]
    pub special_days: Vec<SpecialDay>,
}

fn default_base_reward() -> i64 {
    50
}
fn default_streak_bonus_increment() -> i64 {
    10
}
fn default_max_streak_bonus() -> i64 {
    500
}
fn default_threshold_days() -> u32 {
    7
}
fn default_weekly_bonus() -> i64 {
    500
}

fn milestone(id: &str, name: &str, threshold: i64, reward: i64) -> Milestone {
    Milestone {
        id: id.into(),
        name: name.into(),
        threshold,
        reward,
    }
}

fn default_milestones() -> Vec<Milestone> {
    vec![
        milestone("bronze", "Bronze", 1_000, 100),
        milestone("silver", "Silver", 5_000, 500),
        milestone("gold", "Gold", 10_000, 1_000),
        milestone("platinum", "Platinum", 25_000, 2_500),
    ]
}

fn default_special_days() -> Vec<SpecialDay> {
    vec![SpecialDay {
        month_day: "01-01".into(),
        multiplier: 2.0,
        name: "New Year".into(),
    }]
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            base_reward: default_base_reward(),
            streak_bonus_increment: default_streak_bonus_increment(),
            max_streak_bonus: default_max_streak_bonus(),
        }
    }
}

impl Default for WeeklyConfig {
    fn default() -> Self {
        Self {
            threshold_days: default_threshold_days(),
            bonus: default_weekly_bonus(),
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            daily: DailyConfig::default(),
            weekly: WeeklyConfig::default(),
            milestones: default_milestones(),
            special_days: default_special_days(),
        }
    }
}

impl DailyConfig {
    /// Daily bonus for the given (post-increment) streak, before any special-day multiplier.
    pub fn award_for(&self, streak: u32) -> i64 {
        let extra_days = i64::from(streak.saturating_sub(1));
        let bonus = self
            .streak_bonus_increment
            .saturating_mul(extra_days)
            .min(self.max_streak_bonus);
        self.base_reward.saturating_add(bonus)
    }
}

impl WeeklyConfig {
    /// Whether a streak sits on a multiple of the threshold.
    pub fn qualifies(&self, streak: u32) -> bool {
        streak > 0 && self.threshold_days > 0 && streak % self.threshold_days == 0
    }
}

impl RewardConfig {
    pub fn special_day(&self, month_day: &str) -> Option<&SpecialDay> {
        self.special_days.iter().find(|d| d.month_day == month_day)
    }

    /// Apply a patch: `daily`/`weekly` merge field by field, lists replace wholesale.
    pub fn merged(&self, patch: &RewardConfigPatch) -> RewardConfig {
        let mut next = self.clone();
        if let Some(daily) = &patch.daily {
            if let Some(v) = daily.base_reward {
                next.daily.base_reward = v;
            }
            if let Some(v) = daily.streak_bonus_increment {
                next.daily.streak_bonus_increment = v;
            }
            if let Some(v) = daily.max_streak_bonus {
                next.daily.max_streak_bonus = v;
            }
        }
        if let Some(weekly) = &patch.weekly {
            if let Some(v) = weekly.threshold_days {
                next.weekly.threshold_days = v;
            }
            if let Some(v) = weekly.bonus {
                next.weekly.bonus = v;
            }
        }
        if let Some(milestones) = &patch.milestones {
            next.milestones = milestones.clone();
        }
        if let Some(days) = &patch.special_days {
            next.special_days = days.clone();
        }
        next.normalize();
        next
    }

    fn normalize(&mut self) {
        self.milestones.sort_by_key(|m| m.threshold);
    }

    /// Check every field an admin can set.
    ///
    /// # Errors
    /// The first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        non_negative("daily.baseReward", self.daily.base_reward)?;
        non_negative("daily.streakBonusIncrement", self.daily.streak_bonus_increment)?;
        non_negative("daily.maxStreakBonus", self.daily.max_streak_bonus)?;
        non_negative("weekly.bonus", self.weekly.bonus)?;
        if self.weekly.threshold_days == 0 {
            return Err(ValidationError::value("weekly.thresholdDays", "must be at least 1"));
        }

        let mut ids = HashSet::new();
        for m in &self.milestones {
            if m.id.trim().is_empty() {
                return Err(ValidationError::value("milestones.id", "must not be empty"));
            }
            if !ids.insert(m.id.as_str()) {
                return Err(ValidationError::value(
                    "milestones.id",
                    format!("duplicate id '{}'", m.id),
                ));
            }
            non_negative("milestones.threshold", m.threshold)?;
            non_negative("milestones.reward", m.reward)?;
        }

        let mut days = HashSet::new();
        for d in &self.special_days {
            // 2000 is a leap year, so 02-29 is accepted.
            NaiveDate::parse_from_str(&format!("2000-{}", d.month_day), "%Y-%m-%d")
                .ok()
                .filter(|_| d.month_day.len() == 5)
                .ok_or_else(|| {
                    ValidationError::value(
                        "specialDays.monthDay",
                        format!("'{}' is not MM-DD", d.month_day),
                    )
                })?;
            if !d.multiplier.is_finite() || d.multiplier < 0.0 {
                return Err(ValidationError::value(
                    "specialDays.multiplier",
                    format!("{} is not a finite non-negative number", d.multiplier),
                ));
            }
            if !days.insert(d.month_day.as_str()) {
                return Err(ValidationError::value(
                    "specialDays.monthDay",
                    format!("duplicate day '{}'", d.month_day),
                ));
            }
        }
        Ok(())
    }
}

fn non_negative(field: &str, value: i64) -> Result<(), ValidationError> {
    if value < 0 {
        Err(ValidationError::value(field, format!("{value} is negative")))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPatch {
    pub base_reward: Option<i64>,
    pub streak_bonus_increment: Option<i64>,
    pub max_streak_bonus: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPatch {
    pub threshold_days: Option<u32>,
    pub bonus: Option<i64>,
}

/// Admin update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardConfigPatch {
    pub daily: Option<DailyPatch>,
    pub weekly: Option<WeeklyPatch>,
    pub milestones: Option<Vec<Milestone>>,
    pub special_days: Option<Vec<SpecialDay>>,
}

/// Reads and writes the stored [`RewardConfig`].
pub struct ConfigStore;

impl ConfigStore {
    /// Current configuration, or the defaults if it is absent or unreadable.
    pub fn get(db: &Database) -> RewardConfig {
        match db.kv_get(CONFIG_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<RewardConfig>(&raw) {
                Ok(mut cfg) => {
                    cfg.normalize();
                    cfg
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stored reward config is malformed, using defaults");
                    RewardConfig::default()
                }
            },
            Ok(None) => RewardConfig::default(),
            Err(e) => {
                tracing::warn!(error = %e, "reward config unavailable, using defaults");
                RewardConfig::default()
            }
        }
    }

    /// Merge `patch` into the current configuration and store the result.
    ///
    /// # Errors
    /// Validation errors leave the stored document untouched.
    pub fn update(db: &Database, patch: &RewardConfigPatch) -> Result<RewardConfig, CoreError> {
        let next = Self::get(db).merged(patch);
        next.validate()?;
        db.kv_set(CONFIG_KEY, &serde_json::to_string(&next)?)?;
        tracing::info!(
            milestones = next.milestones.len(),
            special_days = next.special_days.len(),
            "reward config updated"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_config_yields_defaults() {
        let db = Database::open_memory().unwrap();
        assert_eq!(ConfigStore::get(&db), RewardConfig::default());
    }

    #[test]
    fn malformed_config_yields_defaults() {
        let db = Database::open_memory().unwrap();
        db.kv_set(CONFIG_KEY, "{not json").unwrap();
        assert_eq!(ConfigStore::get(&db), RewardConfig::default());
    }

    #[test]
    fn partial_document_keeps_defaults_for_missing_fields() {
        let db = Database::open_memory().unwrap();
        db.kv_set(CONFIG_KEY, r#"{"daily":{"baseReward":75}}"#).unwrap();
        let cfg = ConfigStore::get(&db);
        assert_eq!(cfg.daily.base_reward, 75);
        assert_eq!(cfg.daily.streak_bonus_increment, 10);
        assert_eq!(cfg.weekly, WeeklyConfig::default());
        assert_eq!(cfg.milestones.len(), 4);
    }

    #[test]
    fn update_merges_field_by_field() {
        let db = Database::open_memory().unwrap();
        let patch = RewardConfigPatch {
            daily: Some(DailyPatch {
                max_streak_bonus: Some(100),
                ..DailyPatch::default()
            }),
            ..RewardConfigPatch::default()
        };
        ConfigStore::update(&db, &patch).unwrap();

        let patch = RewardConfigPatch {
            weekly: Some(WeeklyPatch {
                bonus: Some(900),
                ..WeeklyPatch::default()
            }),
            ..RewardConfigPatch::default()
        };
        let cfg = ConfigStore::update(&db, &patch).unwrap();

        assert_eq!(cfg.daily.max_streak_bonus, 100);
        assert_eq!(cfg.daily.base_reward, 50);
        assert_eq!(cfg.weekly.bonus, 900);
        assert_eq!(cfg.weekly.threshold_days, 7);
        assert_eq!(ConfigStore::get(&db), cfg);
    }

    #[test]
    fn update_sorts_milestones_by_threshold() {
        let db = Database::open_memory().unwrap();
        let patch = RewardConfigPatch {
            milestones: Some(vec![
                milestone("gold", "Gold", 10_000, 1_000),
                milestone("bronze", "Bronze", 1_000, 100),
            ]),
            ..RewardConfigPatch::default()
        };
        let cfg = ConfigStore::update(&db, &patch).unwrap();
        let ids: Vec<_> = cfg.milestones.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["bronze", "gold"]);
    }

    #[test]
    fn invalid_update_writes_nothing() {
        let db = Database::open_memory().unwrap();
        let patch = RewardConfigPatch {
            weekly: Some(WeeklyPatch {
                threshold_days: Some(0),
                ..WeeklyPatch::default()
            }),
            ..RewardConfigPatch::default()
        };
        assert!(ConfigStore::update(&db, &patch).is_err());
        assert!(db.kv_get(CONFIG_KEY).unwrap().is_none());
    }

    #[test]
    fn validate_rejects_bad_special_days_and_duplicates() {
        let mut cfg = RewardConfig::default();
        cfg.special_days[0].month_day = "13-40".into();
        assert!(cfg.validate().is_err());

        let mut cfg = RewardConfig::default();
        cfg.special_days[0].multiplier = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = RewardConfig::default();
        cfg.special_days[0].month_day = "02-29".into();
        assert!(cfg.validate().is_ok());

        let mut cfg = RewardConfig::default();
        cfg.milestones.push(milestone("bronze", "Again", 50_000, 1));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn daily_award_caps_the_streak_bonus() {
        let daily = DailyConfig::default();
        assert_eq!(daily.award_for(1), 50);
        assert_eq!(daily.award_for(6), 100);
        assert_eq!(daily.award_for(51), 550);
        assert_eq!(daily.award_for(400), 550);
        assert_eq!(daily.award_for(0), 50);
    }

    #[test]
    fn weekly_qualifies_on_every_multiple() {
        let weekly = WeeklyConfig::default();
        assert!(!weekly.qualifies(0));
        assert!(!weekly.qualifies(6));
        assert!(weekly.qualifies(7));
        assert!(weekly.qualifies(14));
        assert!(!weekly.qualifies(15));
    }
}

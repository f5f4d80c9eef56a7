//! Per-user loyalty profile.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const MAX_USER_ID_LEN: usize = 128;

/// Reject identifiers that are empty, oversized, or outside `[A-Za-z0-9_.:@-]`.
pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    let reason = if id.is_empty() {
        Some("must not be empty")
    } else if id.len() > MAX_USER_ID_LEN {
        Some("longer than 128 bytes")
    } else if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '@' | '-'))
    {
        Some("contains characters outside [A-Za-z0-9_.:@-]")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ValidationError::InvalidUserId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Streak fields of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakInfo {
    pub current: u32,
    pub last_login_date: Option<NaiveDate>,
    pub frozen_until: Option<DateTime<Utc>>,
}

/// Lifetime counters. They only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub lifetime_earned: i64,
    pub lifetime_spent: i64,
}

/// One user's loyalty state. Created lazily on first login or credit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyProfile {
    pub user_id: String,
    pub streak: StreakInfo,
    pub totals: Totals,
    /// Milestone id -> awarded. Flags are set once and never cleared.
    pub milestones: BTreeMap<String, bool>,
    pub last_bonus_date: Option<NaiveDate>,
    pub last_weekly_reward_date: Option<NaiveDate>,
}

impl LoyaltyProfile {
    /// A profile for a user that has never logged in or been credited.
    pub fn fresh(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn has_milestone(&self, id: &str) -> bool {
        self.milestones.get(id).copied().unwrap_or(false)
    }

    /// Whether a freeze is still in force at `now`.
    pub fn is_frozen_at(&self, now: DateTime<Utc>) -> bool {
        self.streak.frozen_until.is_some_and(|until| until > now)
    }
}

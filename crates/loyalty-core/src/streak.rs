//! Daily-login streak state machine.
//!
//! [`next_streak_state`] is the whole decision: it looks at a profile
//! snapshot, the login instant and a config snapshot, and says what the
//! login is worth. It never touches storage. [`StreakEngine::handle_login`]
//! wraps it in the optimistic commit loop so the streak update and the
//! credit commit together or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::calendar::BusinessCalendar;
use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::profile::{validate_user_id, LoyaltyProfile, StreakInfo};
use crate::reward_config::{ConfigStore, RewardConfig};
use crate::storage::{run_optimistic, Attempt, Database, ProfileStore, RetryPolicy};

pub const DAILY_BONUS_REASON: &str = "daily_bonus";

/// Where a user stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakState {
    /// No running streak.
    Fresh,
    Active(u32),
    Frozen(DateTime<Utc>),
}

impl StreakState {
    pub fn of(profile: &LoyaltyProfile, now: DateTime<Utc>) -> Self {
        match profile.streak.frozen_until {
            Some(until) if until > now => StreakState::Frozen(until),
            _ if profile.streak.current > 0 => StreakState::Active(profile.streak.current),
            _ => StreakState::Fresh,
        }
    }
}

/// What a login is worth.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginDecision {
    /// The daily bonus was already paid for this calendar day.
    AlreadyClaimed { streak: u32 },
    /// Accrual is suspended until `until`.
    Frozen { until: DateTime<Utc> },
    /// Pay `award` and persist `profile`.
    Award {
        profile: LoyaltyProfile,
        award: i64,
        special_day: Option<String>,
    },
}

/// Compute the outcome of a login from snapshots alone.
pub fn next_streak_state(
    profile: &LoyaltyProfile,
    now: DateTime<Utc>,
    cfg: &RewardConfig,
    calendar: &BusinessCalendar,
) -> LoginDecision {
    let today = calendar.day_of(now);

    if profile.last_bonus_date == Some(today) {
        return LoginDecision::AlreadyClaimed {
            streak: profile.streak.current,
        };
    }
    if let StreakState::Frozen(until) = StreakState::of(profile, now) {
        return LoginDecision::Frozen { until };
    }

    let continues = profile
        .streak
        .last_login_date
        .is_some_and(|last| calendar.is_previous_day(last, now));
    let new_streak = if continues {
        profile.streak.current.saturating_add(1)
    } else {
        1
    };

    let mut award = cfg.daily.award_for(new_streak);
    let special = cfg.special_day(&calendar.month_day(now));
    if let Some(day) = special {
        award = (award as f64 * day.multiplier).floor() as i64;
    }

    let mut next = profile.clone();
    next.streak = StreakInfo {
        current: new_streak,
        last_login_date: Some(today),
        frozen_until: None,
    };
    next.last_bonus_date = Some(today);

    LoginDecision::Award {
        profile: next,
        award,
        special_day: special.map(|d| d.name.clone()),
    }
}

/// Synchronous response to a login event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOutcome {
    pub streak: u32,
    pub awarded: i64,
    pub message: String,
}

/// Applies login events.
pub struct StreakEngine<'a> {
    db: &'a Database,
    calendar: BusinessCalendar,
    retry: RetryPolicy,
}

impl<'a> StreakEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            calendar: BusinessCalendar::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_calendar(mut self, calendar: BusinessCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle a "user logged in" event at `now`.
    ///
    /// Repeated calls on the same calendar day award nothing. The streak
    /// update and the credit are committed in one transaction guarded by the
    /// profile and wallet versions that were read, so a racing duplicate
    /// login either sees the committed claim or is retried against it.
    ///
    /// # Errors
    /// Validation errors for malformed ids; [`CoreError::Transient`] if the
    /// commit kept conflicting (nothing was written).
    pub fn handle_login(&self, user_id: &str, now: DateTime<Utc>) -> Result<LoginOutcome, CoreError> {
        validate_user_id(user_id)?;

        run_optimistic(self.db, &self.retry, "login", |db| {
            let cfg = ConfigStore::get(db);
            let snapshot = ProfileStore::load(db.conn(), user_id)?;

            match next_streak_state(&snapshot.profile, now, &cfg, &self.calendar) {
                LoginDecision::AlreadyClaimed { streak } => {
                    tracing::debug!(user_id, streak, "daily bonus already claimed");
                    Ok(Attempt::Done(LoginOutcome {
                        streak,
                        awarded: 0,
                        message: "already claimed".into(),
                    }))
                }
                LoginDecision::Frozen { until } => {
                    tracing::debug!(user_id, %until, "login during streak freeze");
                    Ok(Attempt::Done(LoginOutcome {
                        streak: 0,
                        awarded: 0,
                        message: "frozen".into(),
                    }))
                }
                LoginDecision::Award {
                    profile,
                    award,
                    special_day,
                } => {
                    let mut wallet = Ledger::load_wallet(db.conn(), user_id)?;
                    let tx = db.write_tx()?;
                    if !ProfileStore::write_guarded(&tx, &snapshot, &profile, now)? {
                        return Ok(Attempt::Conflict);
                    }
                    let metadata = json!({
                        "streak": profile.streak.current,
                        "specialDay": special_day,
                    });
                    let credited = Ledger::apply_credit(
                        &tx,
                        &mut wallet,
                        user_id,
                        award,
                        DAILY_BONUS_REASON,
                        &metadata,
                        now,
                    )?;
                    if credited.is_none() {
                        return Ok(Attempt::Conflict);
                    }
                    tx.commit()?;

                    tracing::info!(
                        user_id,
                        streak = profile.streak.current,
                        award,
                        "daily bonus awarded"
                    );
                    let message = match special_day {
                        Some(name) => format!("daily bonus claimed ({name})"),
                        None => "daily bonus claimed".to_string(),
                    };
                    Ok(Attempt::Done(LoginOutcome {
                        streak: profile.streak.current,
                        awarded: award,
                        message,
                    }))
                }
            }
        })
    }
}

//! Administrative streak freeze.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CoreError, ValidationError};
use crate::ledger::{AuditEntry, Ledger};
use crate::profile::validate_user_id;
use crate::storage::{run_optimistic, Attempt, Database, ProfileStore, RetryPolicy};

pub const STREAK_FROZEN_REASON: &str = "streak_frozen";

/// Longest freeze an admin can apply in one call.
pub const MAX_FREEZE_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeOutcome {
    pub user_id: String,
    pub previous_streak: u32,
    pub frozen_until: DateTime<Utc>,
    /// The zero-amount audit record of the freeze.
    pub entry: AuditEntry,
}

pub struct FreezeController<'a> {
    db: &'a Database,
    retry: RetryPolicy,
}

impl<'a> FreezeController<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reset the streak to zero and suspend accrual for `duration_days` from now.
    pub fn freeze(&self, user_id: &str, duration_days: i64) -> Result<FreezeOutcome, CoreError> {
        self.freeze_at(user_id, duration_days, Utc::now())
    }

    /// [`FreezeController::freeze`] with an explicit clock.
    ///
    /// Lifetime totals, milestone flags and the wallet balance are untouched.
    pub fn freeze_at(
        &self,
        user_id: &str,
        duration_days: i64,
        now: DateTime<Utc>,
    ) -> Result<FreezeOutcome, CoreError> {
        validate_user_id(user_id)?;
        if !(1..=MAX_FREEZE_DAYS).contains(&duration_days) {
            return Err(ValidationError::value(
                "durationDays",
                format!("{duration_days} is outside 1..={MAX_FREEZE_DAYS}"),
            )
            .into());
        }
        let frozen_until = now + Duration::days(duration_days);

        let outcome = run_optimistic(self.db, &self.retry, "freeze", |db| {
            let snapshot = ProfileStore::load(db.conn(), user_id)?;
            let previous_streak = snapshot.profile.streak.current;

            let mut updated = snapshot.profile.clone();
            updated.streak.current = 0;
            updated.streak.frozen_until = Some(frozen_until);

            let mut wallet = Ledger::load_wallet(db.conn(), user_id)?;
            let tx = db.write_tx()?;
            if !ProfileStore::write_guarded(&tx, &snapshot, &updated, now)? {
                return Ok(Attempt::Conflict);
            }
            let metadata = json!({
                "durationDays": duration_days,
                "frozenUntil": frozen_until,
                "previousStreak": previous_streak,
            });
            let Some(entry) = Ledger::apply_credit(
                &tx,
                &mut wallet,
                user_id,
                0,
                STREAK_FROZEN_REASON,
                &metadata,
                now,
            )?
            else {
                return Ok(Attempt::Conflict);
            };
            tx.commit()?;

            Ok(Attempt::Done(FreezeOutcome {
                user_id: user_id.to_string(),
                previous_streak,
                frozen_until,
                entry,
            }))
        })?;

        tracing::info!(
            user_id,
            duration_days,
            previous_streak = outcome.previous_streak,
            frozen_until = %outcome.frozen_until,
            "streak frozen"
        );
        Ok(outcome)
    }
}

//! Weekly streak bonus sweep.
//!
//! A sweep walks every profile with a running streak in pages ordered by
//! user id. Users whose streak sits on a multiple of `weekly.thresholdDays`
//! and who have not been paid today get `weekly.bonus`. The date guard is
//! re-checked inside each user's commit, so overlapping or repeated runs on
//! one day pay once.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

use crate::calendar::BusinessCalendar;
use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::reward_config::{ConfigStore, WeeklyConfig};
use crate::storage::{
    run_optimistic, AppConfig, Attempt, Database, ProfileStore, RetryPolicy,
};

pub const WEEKLY_BONUS_REASON: &str = "weekly_bonus";

const DEFAULT_PAGE_SIZE: u32 = 200;

/// Counters for one sweep run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub day: Option<NaiveDate>,
    /// Profiles with a running streak that were looked at.
    pub scanned: u64,
    pub awarded: u64,
    /// Not on a multiple of the threshold, or already paid today.
    pub skipped: u64,
    pub failed: u64,
    pub failed_users: Vec<String>,
}

pub struct WeeklyBonusSweeper<'a> {
    db: &'a Database,
    calendar: BusinessCalendar,
    retry: RetryPolicy,
    page_size: u32,
}

impl<'a> WeeklyBonusSweeper<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            calendar: BusinessCalendar::default(),
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
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

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Run one sweep for the calendar day containing `now`.
    ///
    /// A failure for one user is logged and counted; the batch continues.
    /// Only a failure to read a page aborts the run.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CoreError> {
        let today = self.calendar.day_of(now);
        let weekly = ConfigStore::get(self.db).weekly;
        let mut report = SweepReport {
            day: Some(today),
            ..SweepReport::default()
        };

        tracing::info!(%today, threshold_days = weekly.threshold_days, "weekly sweep started");

        let mut after: Option<String> = None;
        loop {
            let page = ProfileStore::page_with_streak(self.db.conn(), after.as_deref(), self.page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.clone());

            for user_id in &page {
                let user_id = user_id.as_str();
                report.scanned += 1;
                match self.award_user(user_id, &weekly, today, now) {
                    Ok(true) => report.awarded += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "weekly bonus failed, will retry next run");
                        report.failed += 1;
                        report.failed_users.push(user_id.to_string());
                    }
                }
            }

            if page.len() < self.page_size as usize {
                break;
            }
        }

        tracing::info!(
            %today,
            scanned = report.scanned,
            awarded = report.awarded,
            skipped = report.skipped,
            failed = report.failed,
            "weekly sweep finished"
        );
        Ok(report)
    }

    /// Pay one user if they still qualify. Returns whether a credit was made.
    fn award_user(
        &self,
        user_id: &str,
        weekly: &WeeklyConfig,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        run_optimistic(self.db, &self.retry, "weekly_bonus", |db| {
            let snapshot = ProfileStore::load(db.conn(), user_id)?;
            let streak = snapshot.profile.streak.current;
            if !weekly.qualifies(streak) || snapshot.profile.last_weekly_reward_date == Some(today) {
                return Ok(Attempt::Done(false));
            }

            let mut updated = snapshot.profile.clone();
            updated.last_weekly_reward_date = Some(today);

            let mut wallet = Ledger::load_wallet(db.conn(), user_id)?;
            let tx = db.write_tx()?;
            if !ProfileStore::write_guarded(&tx, &snapshot, &updated, now)? {
                return Ok(Attempt::Conflict);
            }
            let metadata = json!({
                "streak": streak,
                "thresholdDays": weekly.threshold_days,
                "day": today,
            });
            if Ledger::apply_credit(
                &tx,
                &mut wallet,
                user_id,
                weekly.bonus,
                WEEKLY_BONUS_REASON,
                &metadata,
                now,
            )?
            .is_none()
            {
                return Ok(Attempt::Conflict);
            }
            tx.commit()?;

            tracing::info!(user_id, streak, bonus = weekly.bonus, "weekly bonus awarded");
            Ok(Attempt::Done(true))
        })
    }
}

/// Run a sweep every day at `sweeper.run_at` until `shutdown` flips to `true`.
///
/// Each run opens its own connection to `db_path` on a blocking thread.
///
/// # Errors
/// Returns an error only if the calendar or schedule in `config` is invalid.
pub async fn run_daily(
    db_path: PathBuf,
    config: AppConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CoreError> {
    let calendar = config.calendar()?;
    let run_at = config.sweep_time()?;
    let retry = config.retry_policy();
    let page_size = config.sweeper.page_size;

    tracing::info!(run_at = %run_at, db = %db_path.display(), "weekly sweeper scheduled");

    loop {
        let now = Utc::now();
        let next = calendar.next_occurrence(now, run_at);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(next = %next, "sleeping until next sweep");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let path = db_path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let db = Database::open_at(&path)?;
                    WeeklyBonusSweeper::new(&db)
                        .with_calendar(calendar)
                        .with_retry(retry)
                        .with_page_size(page_size)
                        .sweep(Utc::now())
                })
                .await;
                settle_run(result);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("weekly sweeper stopped");
                    return Ok(());
                }
            }
        }
    }
}

/// Log the end of one scheduled run. Neither an aborted nor a panicked run stops the loop.
fn settle_run(
    result: Result<Result<SweepReport, CoreError>, tokio::task::JoinError>,
) -> Option<SweepReport> {
    match result {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "weekly sweep aborted");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "weekly sweep task panicked");
            None
        }
    }
}

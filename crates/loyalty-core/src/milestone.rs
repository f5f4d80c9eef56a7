//! Lifetime-spend milestones and the spend-recording path that feeds them.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CoreError, ValidationError};
use crate::ledger::{AuditEntry, Ledger};
use crate::profile::validate_user_id;
use crate::reward_config::ConfigStore;
use crate::storage::{run_optimistic, Attempt, Database, ProfileStore, RetryPolicy};

/// Audit reason for a milestone award.
pub fn milestone_reason(id: &str) -> String {
    format!("milestone:{id}")
}

/// A milestone credited by one [`MilestoneEngine::check_and_award`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneAward {
    pub milestone_id: String,
    pub name: String,
    pub threshold: i64,
    pub reward: i64,
    pub entry: AuditEntry,
}

/// Awards each configured milestone at most once per user.
pub struct MilestoneEngine<'a> {
    db: &'a Database,
    retry: RetryPolicy,
}

impl<'a> MilestoneEngine<'a> {
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

    /// Credit every unlocked, unclaimed milestone in ascending threshold order.
    ///
    /// The flag writes are guarded by the profile version that was read and
    /// commit with the credits, so concurrent or repeated calls with the same
    /// `lifetimeSpent` award nothing twice. Safe to call redundantly.
    pub fn check_and_award(&self, user_id: &str) -> Result<Vec<MilestoneAward>, CoreError> {
        validate_user_id(user_id)?;

        run_optimistic(self.db, &self.retry, "milestone_check", |db| {
            let cfg = ConfigStore::get(db);
            let snapshot = ProfileStore::load(db.conn(), user_id)?;
            let spent = snapshot.profile.totals.lifetime_spent;

            let unlocked: Vec<_> = cfg
                .milestones
                .iter()
                .filter(|m| spent >= m.threshold && !snapshot.profile.has_milestone(&m.id))
                .collect();
            if unlocked.is_empty() {
                tracing::debug!(user_id, spent, "no milestones to award");
                return Ok(Attempt::Done(Vec::new()));
            }

            let now = Utc::now();
            let mut updated = snapshot.profile.clone();
            for m in &unlocked {
                updated.milestones.insert(m.id.clone(), true);
            }

            let mut wallet = Ledger::load_wallet(db.conn(), user_id)?;
            let tx = db.write_tx()?;
            if !ProfileStore::write_guarded(&tx, &snapshot, &updated, now)? {
                return Ok(Attempt::Conflict);
            }

            let mut awards = Vec::with_capacity(unlocked.len());
            for m in unlocked {
                let metadata = json!({
                    "milestoneId": m.id,
                    "name": m.name,
                    "threshold": m.threshold,
                    "lifetimeSpent": spent,
                });
                let Some(entry) = Ledger::apply_credit(
                    &tx,
                    &mut wallet,
                    user_id,
                    m.reward,
                    &milestone_reason(&m.id),
                    &metadata,
                    now,
                )?
                else {
                    return Ok(Attempt::Conflict);
                };
                awards.push(MilestoneAward {
                    milestone_id: m.id.clone(),
                    name: m.name.clone(),
                    threshold: m.threshold,
                    reward: m.reward,
                    entry,
                });
            }
            tx.commit()?;

            for award in &awards {
                tracing::info!(
                    user_id,
                    milestone = %award.milestone_id,
                    reward = award.reward,
                    "milestone awarded"
                );
            }
            Ok(Attempt::Done(awards))
        })
    }
}

/// Result of recording one spend event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendReceipt {
    pub user_id: String,
    pub reference: String,
    /// The reference had already been recorded; totals were left alone.
    pub duplicate: bool,
    pub lifetime_spent: i64,
    pub milestones: Vec<MilestoneAward>,
}

/// Inbound "payment/spend recorded" events from billing.
pub struct SpendRecorder<'a> {
    db: &'a Database,
    retry: RetryPolicy,
}

impl<'a> SpendRecorder<'a> {
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

    /// Add `amount` to `lifetimeSpent` once per `reference`, then check milestones.
    ///
    /// Replaying a reference is reported as a duplicate; the milestone check
    /// still runs so a crash between the two steps heals on retry.
    pub fn record_spend(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
    ) -> Result<SpendReceipt, CoreError> {
        validate_user_id(user_id)?;
        if amount <= 0 {
            return Err(ValidationError::value("amount", format!("{amount} must be positive")).into());
        }
        if reference.trim().is_empty() {
            return Err(ValidationError::value("reference", "must not be empty").into());
        }

        let inserted = run_optimistic(self.db, &self.retry, "record_spend", |db| {
            let now = Utc::now();
            let tx = db.write_tx()?;
            let inserted = tx.execute(
                "INSERT INTO spend_events (reference, user_id, amount, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(reference) DO NOTHING",
                params![reference, user_id, amount, now.to_rfc3339()],
            )? == 1;
            if inserted {
                ProfileStore::ensure_exists(&tx, user_id, now)?;
                ProfileStore::add_lifetime_spent(&tx, user_id, amount)?;
            }
            tx.commit()?;
            Ok(Attempt::Done(inserted))
        })?;

        if inserted {
            tracing::info!(user_id, amount, reference, "spend recorded");
        } else {
            tracing::debug!(user_id, reference, "duplicate spend reference ignored");
        }

        let milestones = MilestoneEngine::new(self.db)
            .with_retry(self.retry)
            .check_and_award(user_id)?;
        let lifetime_spent = ProfileStore::load(self.db.conn(), user_id)?
            .profile
            .totals
            .lifetime_spent;

        Ok(SpendReceipt {
            user_id: user_id.to_string(),
            reference: reference.to_string(),
            duplicate: !inserted,
            lifetime_spent,
            milestones,
        })
    }
}

//! Row mapping for `loyalty_profiles`.
//!
//! The `version` column guards the derived columns (streak, milestone flags,
//! bonus dates). Lifetime totals are plain increments and do not bump it, so
//! a credit landing between a login's read and commit never forces the login
//! to retry.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, DatabaseError, ValidationError};
use crate::profile::{LoyaltyProfile, StreakInfo, Totals};

const DATE_FORMAT: &str = "%Y-%m-%d";

const PROFILE_COLUMNS: &str = "user_id, streak_current, last_login_date, frozen_until,
    lifetime_earned, lifetime_spent, milestones, last_bonus_date, last_weekly_reward_date, version";

/// A profile as read, with the version any guarded write must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub profile: LoyaltyProfile,
    /// `None` when no row exists yet.
    pub version: Option<i64>,
}

struct ProfileRow {
    user_id: String,
    streak_current: i64,
    last_login_date: Option<String>,
    frozen_until: Option<String>,
    lifetime_earned: i64,
    lifetime_spent: i64,
    milestones: String,
    last_bonus_date: Option<String>,
    last_weekly_reward_date: Option<String>,
    version: i64,
}

impl ProfileRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            streak_current: row.get(1)?,
            last_login_date: row.get(2)?,
            frozen_until: row.get(3)?,
            lifetime_earned: row.get(4)?,
            lifetime_spent: row.get(5)?,
            milestones: row.get(6)?,
            last_bonus_date: row.get(7)?,
            last_weekly_reward_date: row.get(8)?,
            version: row.get(9)?,
        })
    }

    fn into_snapshot(self) -> Result<ProfileSnapshot, DatabaseError> {
        let milestones: BTreeMap<String, bool> =
            serde_json::from_str(&self.milestones).map_err(|e| corrupt(e.to_string()))?;
        let profile = LoyaltyProfile {
            streak: StreakInfo {
                current: u32::try_from(self.streak_current)
                    .map_err(|_| corrupt(format!("streak_current {}", self.streak_current)))?,
                last_login_date: parse_date(self.last_login_date.as_deref())?,
                frozen_until: parse_instant(self.frozen_until.as_deref())?,
            },
            totals: Totals {
                lifetime_earned: self.lifetime_earned,
                lifetime_spent: self.lifetime_spent,
            },
            milestones,
            last_bonus_date: parse_date(self.last_bonus_date.as_deref())?,
            last_weekly_reward_date: parse_date(self.last_weekly_reward_date.as_deref())?,
            user_id: self.user_id,
        };
        Ok(ProfileSnapshot {
            profile,
            version: Some(self.version),
        })
    }
}

fn corrupt(message: String) -> DatabaseError {
    DatabaseError::Corrupt {
        table: "loyalty_profiles",
        message,
    }
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>, DatabaseError> {
    value
        .map(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| corrupt(format!("{s}: {e}"))))
        .transpose()
}

fn parse_instant(value: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("{s}: {e}")))
        })
        .transpose()
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

/// Stateless accessors over `loyalty_profiles`.
pub struct ProfileStore;

impl ProfileStore {
    /// Read a user's profile, or a fresh unpersisted one if none exists.
    pub fn load(conn: &Connection, user_id: &str) -> Result<ProfileSnapshot, CoreError> {
        let row = conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM loyalty_profiles WHERE user_id = ?1"),
                params![user_id],
                ProfileRow::from_row,
            )
            .optional()?;
        match row {
            Some(row) => Ok(row.into_snapshot()?),
            None => Ok(ProfileSnapshot {
                profile: LoyaltyProfile::fresh(user_id),
                version: None,
            }),
        }
    }

    /// Write the derived columns of `updated` if the row still matches `snapshot`.
    ///
    /// Returns `false` when another writer got there first. Totals are only
    /// written when the row is created; afterwards they change through
    /// [`ProfileStore::add_lifetime_earned`] and [`ProfileStore::add_lifetime_spent`].
    pub fn write_guarded(
        conn: &Connection,
        snapshot: &ProfileSnapshot,
        updated: &LoyaltyProfile,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let milestones = serde_json::to_string(&updated.milestones)?;
        let frozen_until = updated.streak.frozen_until.map(|t| t.to_rfc3339());
        let changed = match snapshot.version {
            None => conn.execute(
                "INSERT INTO loyalty_profiles
                    (user_id, streak_current, last_login_date, frozen_until, lifetime_earned,
                     lifetime_spent, milestones, last_bonus_date, last_weekly_reward_date,
                     version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)
                 ON CONFLICT(user_id) DO NOTHING",
                params![
                    updated.user_id,
                    updated.streak.current,
                    format_date(updated.streak.last_login_date),
                    frozen_until,
                    updated.totals.lifetime_earned,
                    updated.totals.lifetime_spent,
                    milestones,
                    format_date(updated.last_bonus_date),
                    format_date(updated.last_weekly_reward_date),
                    now.to_rfc3339(),
                ],
            )?,
            Some(version) => conn.execute(
                "UPDATE loyalty_profiles
                 SET streak_current = ?2, last_login_date = ?3, frozen_until = ?4,
                     milestones = ?5, last_bonus_date = ?6, last_weekly_reward_date = ?7,
                     version = version + 1, updated_at = ?8
                 WHERE user_id = ?1 AND version = ?9",
                params![
                    updated.user_id,
                    updated.streak.current,
                    format_date(updated.streak.last_login_date),
                    frozen_until,
                    milestones,
                    format_date(updated.last_bonus_date),
                    format_date(updated.last_weekly_reward_date),
                    now.to_rfc3339(),
                    version,
                ],
            )?,
        };
        Ok(changed == 1)
    }

    /// Create an empty row for `user_id` if none exists.
    pub fn ensure_exists(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        conn.execute(
            "INSERT INTO loyalty_profiles (user_id, version, updated_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO NOTHING",
            params![user_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn add_lifetime_earned(conn: &Connection, user_id: &str, amount: i64) -> Result<(), CoreError> {
        Self::add_to_total(conn, user_id, "lifetime_earned", "lifetimeEarned", amount)
    }

    pub fn add_lifetime_spent(conn: &Connection, user_id: &str, amount: i64) -> Result<(), CoreError> {
        Self::add_to_total(conn, user_id, "lifetime_spent", "lifetimeSpent", amount)
    }

    /// Read-check-write of one total; callers run it inside their write transaction.
    ///
    /// SQLite turns an overflowing integer sum into a REAL, which would make
    /// the row unreadable, so the sum is checked here instead.
    fn add_to_total(
        conn: &Connection,
        user_id: &str,
        column: &'static str,
        field: &'static str,
        amount: i64,
    ) -> Result<(), CoreError> {
        let current = conn
            .query_row(
                &format!("SELECT {column} FROM loyalty_profiles WHERE user_id = ?1"),
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(());
        };
        let next = current.checked_add(amount).ok_or_else(|| {
            ValidationError::value(field, format!("{current} + {amount} overflows"))
        })?;
        conn.execute(
            &format!("UPDATE loyalty_profiles SET {column} = ?2 WHERE user_id = ?1"),
            params![user_id, next],
        )?;
        Ok(())
    }

    /// Ids of users with a running streak, ordered, starting after `after`.
    ///
    /// Only ids are read so one undecodable row cannot fail a whole page.
    pub fn page_with_streak(
        conn: &Connection,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<String>, CoreError> {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM loyalty_profiles
             WHERE streak_current > 0 AND user_id > ?1
             ORDER BY user_id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after.unwrap_or(""), limit], |row| row.get(0))?;

        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn missing_profile_loads_fresh() {
        let db = Database::open_memory().unwrap();
        let snap = ProfileStore::load(db.conn(), "nobody").unwrap();
        assert_eq!(snap.version, None);
        assert_eq!(snap.profile, LoyaltyProfile::fresh("nobody"));
    }

    #[test]
    fn guarded_write_round_trips_and_bumps_version() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let snap = ProfileStore::load(db.conn(), "u1").unwrap();

        let mut updated = snap.profile.clone();
        updated.streak.current = 3;
        updated.streak.last_login_date = Some(date("2025-04-02"));
        updated.last_bonus_date = Some(date("2025-04-02"));
        updated.milestones.insert("bronze".into(), true);
        assert!(ProfileStore::write_guarded(db.conn(), &snap, &updated, now).unwrap());

        let reread = ProfileStore::load(db.conn(), "u1").unwrap();
        assert_eq!(reread.version, Some(1));
        assert_eq!(reread.profile, updated);

        let mut again = reread.profile.clone();
        again.streak.current = 4;
        assert!(ProfileStore::write_guarded(db.conn(), &reread, &again, now).unwrap());
        assert_eq!(ProfileStore::load(db.conn(), "u1").unwrap().version, Some(2));
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        ProfileStore::ensure_exists(db.conn(), "u1", now).unwrap();
        let stale = ProfileStore::load(db.conn(), "u1").unwrap();

        let mut first = stale.profile.clone();
        first.streak.current = 1;
        assert!(ProfileStore::write_guarded(db.conn(), &stale, &first, now).unwrap());

        let mut second = stale.profile.clone();
        second.streak.current = 9;
        assert!(!ProfileStore::write_guarded(db.conn(), &stale, &second, now).unwrap());
        assert_eq!(
            ProfileStore::load(db.conn(), "u1").unwrap().profile.streak.current,
            1
        );
    }

    #[test]
    fn insert_race_is_rejected() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let unseen = ProfileStore::load(db.conn(), "u1").unwrap();
        ProfileStore::ensure_exists(db.conn(), "u1", now).unwrap();

        let mut updated = unseen.profile.clone();
        updated.streak.current = 1;
        assert!(!ProfileStore::write_guarded(db.conn(), &unseen, &updated, now).unwrap());
    }

    #[test]
    fn totals_increment_without_bumping_version() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        ProfileStore::ensure_exists(db.conn(), "u1", now).unwrap();
        ProfileStore::add_lifetime_earned(db.conn(), "u1", 40).unwrap();
        ProfileStore::add_lifetime_spent(db.conn(), "u1", 900).unwrap();
        ProfileStore::add_lifetime_spent(db.conn(), "u1", 300).unwrap();

        let snap = ProfileStore::load(db.conn(), "u1").unwrap();
        assert_eq!(snap.version, Some(1));
        assert_eq!(snap.profile.totals.lifetime_earned, 40);
        assert_eq!(snap.profile.totals.lifetime_spent, 1200);
    }

    #[test]
    fn page_with_streak_skips_zero_streaks_and_pages_by_id() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        for (user, streak) in [("a", 7), ("b", 0), ("c", 14), ("d", 3)] {
            let snap = ProfileStore::load(db.conn(), user).unwrap();
            let mut p = snap.profile.clone();
            p.streak.current = streak;
            ProfileStore::write_guarded(db.conn(), &snap, &p, now).unwrap();
        }

        let first = ProfileStore::page_with_streak(db.conn(), None, 2).unwrap();
        assert_eq!(first, ["a", "c"]);

        let second = ProfileStore::page_with_streak(db.conn(), Some("c"), 2).unwrap();
        assert_eq!(second, ["d"]);
    }

    #[test]
    fn page_with_streak_lists_undecodable_rows() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let snap = ProfileStore::load(db.conn(), "a").unwrap();
        let mut p = snap.profile.clone();
        p.streak.current = 7;
        ProfileStore::write_guarded(db.conn(), &snap, &p, now).unwrap();
        db.conn()
            .execute("UPDATE loyalty_profiles SET milestones = 'garbage'", [])
            .unwrap();

        assert!(ProfileStore::load(db.conn(), "a").is_err());
        assert_eq!(ProfileStore::page_with_streak(db.conn(), None, 10).unwrap(), ["a"]);
    }

    #[test]
    fn totals_reject_overflow_and_keep_the_row_readable() {
        let db = Database::open_memory().unwrap();
        ProfileStore::ensure_exists(db.conn(), "u1", Utc::now()).unwrap();
        ProfileStore::add_lifetime_spent(db.conn(), "u1", i64::MAX).unwrap();
        ProfileStore::add_lifetime_earned(db.conn(), "u1", i64::MAX - 1).unwrap();

        let err = ProfileStore::add_lifetime_spent(db.conn(), "u1", 1).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        ProfileStore::add_lifetime_earned(db.conn(), "u1", 1).unwrap();
        assert!(ProfileStore::add_lifetime_earned(db.conn(), "u1", 1).is_err());

        let totals = ProfileStore::load(db.conn(), "u1").unwrap().profile.totals;
        assert_eq!(totals.lifetime_spent, i64::MAX);
        assert_eq!(totals.lifetime_earned, i64::MAX);
    }
}

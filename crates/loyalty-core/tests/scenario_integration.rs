//! End-to-end scenarios against a file-backed database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use loyalty_core::{
    ConfigStore, Database, FreezeController, Ledger, ProfileStore, RewardConfigPatch,
    SpecialDay, SpendRecorder, StreakEngine, WeeklyBonusSweeper,
};

fn day(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap() + Duration::days(i64::from(d))
}

fn open() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(dir.path().join("loyalty.db")).unwrap();
    (dir, db)
}

#[test]
fn test_two_weeks_of_logins_with_weekly_sweeps() {
    let (_dir, db) = open();
    let streaks = StreakEngine::new(&db);
    let sweeper = WeeklyBonusSweeper::new(&db);

    let mut daily_total = 0;
    let mut weekly_paid = 0;
    for d in 1..=14 {
        let outcome = streaks.handle_login("regular", day(d, 8)).unwrap();
        assert_eq!(outcome.streak, d);
        daily_total += outcome.awarded;
        weekly_paid += sweeper.sweep(day(d, 23)).unwrap().awarded;
    }

    // 50, 60, ... capped at 50 + 500; 14 days never reach the cap.
    let expected_daily: i64 = (0..14).map(|n| 50 + 10 * n).sum();
    assert_eq!(daily_total, expected_daily);
    assert_eq!(weekly_paid, 2);
    assert_eq!(
        Ledger::new(&db).balance("regular").unwrap().balance,
        expected_daily + 2 * 500
    );
}

#[test]
fn test_special_day_login() {
    let (_dir, db) = open();
    // 2025-01-01 is New Year in the default config.
    let outcome = StreakEngine::new(&db)
        .handle_login("u1", day(0, 10))
        .unwrap();
    assert_eq!(outcome.awarded, 100);

    ConfigStore::update(
        &db,
        &RewardConfigPatch {
            special_days: Some(vec![SpecialDay {
                month_day: "01-02".into(),
                multiplier: 3.0,
                name: "Launch".into(),
            }]),
            ..RewardConfigPatch::default()
        },
    )
    .unwrap();
    let next = StreakEngine::new(&db).handle_login("u1", day(1, 10)).unwrap();
    assert_eq!(next.awarded, 180);
}

#[test]
fn test_freeze_window_then_resume() {
    let (_dir, db) = open();
    let streaks = StreakEngine::new(&db);
    for d in 1..=5 {
        streaks.handle_login("u1", day(d, 9)).unwrap();
    }

    FreezeController::new(&db)
        .freeze_at("u1", 2, day(5, 12))
        .unwrap();
    let profile_before = ProfileStore::load(db.conn(), "u1").unwrap().profile;

    let frozen = streaks.handle_login("u1", day(6, 9)).unwrap();
    assert_eq!((frozen.streak, frozen.awarded), (0, 0));
    let profile_after = ProfileStore::load(db.conn(), "u1").unwrap().profile;
    assert_eq!(profile_after.last_bonus_date, profile_before.last_bonus_date);

    // Weekly sweep ignores a frozen user.
    assert_eq!(WeeklyBonusSweeper::new(&db).sweep(day(6, 23)).unwrap().scanned, 0);

    let resumed = streaks.handle_login("u1", day(8, 9)).unwrap();
    assert_eq!(resumed.streak, 1);
    assert_eq!(resumed.awarded, 50);
}

#[test]
fn test_spend_then_audit_feed() {
    let (_dir, db) = open();
    let spend = SpendRecorder::new(&db);
    spend.record_spend("u1", 900, "inv-1").unwrap();
    let receipt = spend.record_spend("u1", 300, "inv-2").unwrap();
    assert_eq!(receipt.milestones.len(), 1);

    StreakEngine::new(&db).handle_login("u2", day(3, 9)).unwrap();

    let ledger = Ledger::new(&db);
    let feed = ledger.entries_since(0, 100).unwrap();
    let summary: Vec<_> = feed
        .iter()
        .map(|e| (e.user_id.as_str(), e.amount, e.reason.as_str()))
        .collect();
    assert_eq!(
        summary,
        [("u1", 100, "milestone:bronze"), ("u2", 50, "daily_bonus")]
    );
    assert!(feed[0].seq < feed[1].seq);
    assert!(ledger.entries_since(feed[1].seq, 100).unwrap().is_empty());
}

#[test]
fn test_audit_entries_are_immutable() {
    let (_dir, db) = open();
    Ledger::new(&db)
        .credit("u1", 10, "seed", serde_json::json!({}))
        .unwrap();

    assert!(db
        .conn()
        .execute("UPDATE audit_entries SET amount = 1000", [])
        .is_err());
    assert!(db.conn().execute("DELETE FROM audit_entries", []).is_err());
    assert_eq!(Ledger::new(&db).history("u1", 10).unwrap()[0].amount, 10);
}

#[test]
fn test_reopening_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loyalty.db");
    {
        let db = Database::open_at(&path).unwrap();
        StreakEngine::new(&db).handle_login("u1", day(1, 9)).unwrap();
    }
    let db = Database::open_at(&path).unwrap();
    let next = StreakEngine::new(&db).handle_login("u1", day(2, 9)).unwrap();
    assert_eq!(next.streak, 2);
}

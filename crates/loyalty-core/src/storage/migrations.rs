//! Database schema migrations for the loyalty ledger.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: wallets, profiles, the audit trail and the kv store.
///
/// Audit rows are guarded by triggers so neither UPDATE nor DELETE can
/// rewrite history, whatever connection issues them.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS wallets (
            user_id     TEXT PRIMARY KEY,
            balance     INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
            version     INTEGER NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS loyalty_profiles (
            user_id                 TEXT PRIMARY KEY,
            streak_current          INTEGER NOT NULL DEFAULT 0 CHECK (streak_current >= 0),
            last_login_date         TEXT,
            frozen_until            TEXT,
            lifetime_earned         INTEGER NOT NULL DEFAULT 0 CHECK (lifetime_earned >= 0),
            lifetime_spent          INTEGER NOT NULL DEFAULT 0 CHECK (lifetime_spent >= 0),
            milestones              TEXT NOT NULL DEFAULT '{}',
            last_bonus_date         TEXT,
            last_weekly_reward_date TEXT,
            version                 INTEGER NOT NULL,
            updated_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_entries (
            seq              INTEGER PRIMARY KEY AUTOINCREMENT,
            id               TEXT NOT NULL UNIQUE,
            user_id          TEXT NOT NULL,
            action           TEXT NOT NULL,
            amount           INTEGER NOT NULL,
            reason           TEXT NOT NULL,
            metadata         TEXT NOT NULL DEFAULT '{}',
            previous_balance INTEGER NOT NULL,
            new_balance      INTEGER NOT NULL,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_entries_user_seq ON audit_entries(user_id, seq);
        CREATE INDEX IF NOT EXISTS idx_profiles_streak ON loyalty_profiles(streak_current);

        CREATE TRIGGER IF NOT EXISTS audit_entries_immutable_update
        BEFORE UPDATE ON audit_entries
        BEGIN
            SELECT RAISE(ABORT, 'audit entries are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_entries_immutable_delete
        BEFORE DELETE ON audit_entries
        BEGIN
            SELECT RAISE(ABORT, 'audit entries are immutable');
        END;

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: recorded spend references.
///
/// Billing delivers spend events at least once; the reference column lets a
/// redelivery be recognised instead of counted twice.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS spend_events (
            reference   TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            amount      INTEGER NOT NULL CHECK (amount > 0),
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_spend_events_user ON spend_events(user_id);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);

        let has_spend_events: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'spend_events'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_spend_events, 1);
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);
    }

    #[test]
    fn test_incremental_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);
    }

    #[test]
    fn test_audit_entries_reject_update_and_delete() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO audit_entries
                (id, user_id, action, amount, reason, previous_balance, new_balance, created_at)
             VALUES ('a1', 'u1', 'credit', 10, 'test', 0, 10, '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE audit_entries SET amount = 99 WHERE id = 'a1'", [])
            .is_err());
        assert!(conn
            .execute("DELETE FROM audit_entries WHERE id = 'a1'", [])
            .is_err());

        let amount: i64 = conn
            .query_row("SELECT amount FROM audit_entries WHERE id = 'a1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(amount, 10);
    }
}

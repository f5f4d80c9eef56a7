//! Token balances and the append-only audit trail.
//!
//! [`Ledger::credit`] is the only path that changes a wallet. Each successful
//! call writes exactly one [`AuditEntry`] in the same transaction as the
//! balance change, so the number of entries and the sum of their balance
//! deltas always agree with the wallet.
//!
//! Engines that must commit other state together with a credit (a streak
//! update, a milestone flag) call [`Ledger::apply_credit`] inside their own
//! transaction instead.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, DatabaseError, ValidationError};
use crate::profile::validate_user_id;
use crate::storage::{run_optimistic, Attempt, Database, ProfileStore, RetryPolicy};

/// Kind of audit record, derived from the sign of the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Credit,
    Debit,
    /// Zero-amount entry that records an event without moving tokens.
    Note,
}

impl AuditAction {
    fn for_amount(amount: i64) -> Self {
        match amount {
            a if a > 0 => AuditAction::Credit,
            a if a < 0 => AuditAction::Debit,
            _ => AuditAction::Note,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Credit => "credit",
            AuditAction::Debit => "debit",
            AuditAction::Note => "note",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(AuditAction::Credit),
            "debit" => Some(AuditAction::Debit),
            "note" => Some(AuditAction::Note),
            _ => None,
        }
    }
}

/// One immutable record of a credit call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Stable identifier for downstream consumers.
    pub id: String,
    /// Position in the global feed; increases with creation order.
    pub seq: i64,
    pub user_id: String,
    pub action: AuditAction,
    pub amount: i64,
    pub reason: String,
    pub metadata: serde_json::Value,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub user_id: String,
    pub balance: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A wallet as read, with the version a guarded write must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub balance: i64,
    /// `None` when no row exists yet.
    pub version: Option<i64>,
}

const AUDIT_COLUMNS: &str = "seq, id, user_id, action, amount, reason, metadata,
    previous_balance, new_balance, created_at";

struct AuditRow {
    seq: i64,
    id: String,
    user_id: String,
    action: String,
    amount: i64,
    reason: String,
    metadata: String,
    previous_balance: i64,
    new_balance: i64,
    created_at: String,
}

impl AuditRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            user_id: row.get(2)?,
            action: row.get(3)?,
            amount: row.get(4)?,
            reason: row.get(5)?,
            metadata: row.get(6)?,
            previous_balance: row.get(7)?,
            new_balance: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<AuditEntry, DatabaseError> {
        let corrupt = |message: String| DatabaseError::Corrupt {
            table: "audit_entries",
            message,
        };
        Ok(AuditEntry {
            action: AuditAction::parse(&self.action)
                .ok_or_else(|| corrupt(format!("action {}", self.action)))?,
            metadata: serde_json::from_str(&self.metadata).map_err(|e| corrupt(e.to_string()))?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| corrupt(format!("{}: {e}", self.created_at)))?
                .with_timezone(&Utc),
            seq: self.seq,
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            reason: self.reason,
            previous_balance: self.previous_balance,
            new_balance: self.new_balance,
        })
    }
}

/// Balance mutation and audit history for all users.
pub struct Ledger<'a> {
    db: &'a Database,
    retry: RetryPolicy,
}

impl<'a> Ledger<'a> {
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

    /// Add `amount` to the user's balance and append an audit entry.
    ///
    /// `amount` may be zero (audit-only) or negative; the balance is clamped
    /// at zero and the entry records the clamped result. Positive amounts
    /// also count towards `lifetimeEarned`.
    ///
    /// # Errors
    /// Validation errors for malformed ids or an empty reason;
    /// [`CoreError::Transient`] if concurrent writers kept winning.
    pub fn credit(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        metadata: serde_json::Value,
    ) -> Result<AuditEntry, CoreError> {
        validate_user_id(user_id)?;
        validate_reason(reason)?;

        let entry = run_optimistic(self.db, &self.retry, "credit", |db| {
            let mut wallet = Self::load_wallet(db.conn(), user_id)?;
            let tx = db.write_tx()?;
            match Self::apply_credit(&tx, &mut wallet, user_id, amount, reason, &metadata, Utc::now())? {
                Some(entry) => {
                    tx.commit()?;
                    Ok(Attempt::Done(entry))
                }
                None => Ok(Attempt::Conflict),
            }
        })?;

        tracing::info!(
            user_id,
            amount,
            reason,
            new_balance = entry.new_balance,
            "ledger credit committed"
        );
        Ok(entry)
    }

    /// Guarded balance write plus audit append, inside the caller's transaction.
    ///
    /// Returns `None` if the wallet no longer matches `wallet`; the caller
    /// must abandon its transaction and retry from a fresh read. On success
    /// `wallet` is advanced so further credits in the same transaction chain.
    pub(crate) fn apply_credit(
        conn: &Connection,
        wallet: &mut WalletSnapshot,
        user_id: &str,
        amount: i64,
        reason: &str,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Option<AuditEntry>, CoreError> {
        let previous_balance = wallet.balance;
        let new_balance = previous_balance
            .checked_add(amount)
            .ok_or_else(|| {
                ValidationError::value("amount", format!("{previous_balance} + {amount} overflows"))
            })?
            .max(0);

        let changed = match wallet.version {
            None => conn.execute(
                "INSERT INTO wallets (user_id, balance, version, updated_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(user_id) DO NOTHING",
                params![user_id, new_balance, now.to_rfc3339()],
            )?,
            Some(version) => conn.execute(
                "UPDATE wallets SET balance = ?2, version = version + 1, updated_at = ?3
                 WHERE user_id = ?1 AND version = ?4",
                params![user_id, new_balance, now.to_rfc3339(), version],
            )?,
        };
        if changed != 1 {
            return Ok(None);
        }

        let id = Uuid::new_v4().to_string();
        let action = AuditAction::for_amount(amount);
        conn.execute(
            "INSERT INTO audit_entries
                (id, user_id, action, amount, reason, metadata, previous_balance, new_balance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                user_id,
                action.as_str(),
                amount,
                reason,
                serde_json::to_string(metadata)?,
                previous_balance,
                new_balance,
                now.to_rfc3339(),
            ],
        )?;
        let seq = conn.last_insert_rowid();

        ProfileStore::ensure_exists(conn, user_id, now)?;
        if amount > 0 {
            ProfileStore::add_lifetime_earned(conn, user_id, amount)?;
        }

        *wallet = WalletSnapshot {
            balance: new_balance,
            version: Some(wallet.version.unwrap_or(0) + 1),
        };

        Ok(Some(AuditEntry {
            id,
            seq,
            user_id: user_id.to_string(),
            action,
            amount,
            reason: reason.to_string(),
            metadata: metadata.clone(),
            previous_balance,
            new_balance,
            created_at: now,
        }))
    }

    pub(crate) fn load_wallet(conn: &Connection, user_id: &str) -> Result<WalletSnapshot, CoreError> {
        let row = conn
            .query_row(
                "SELECT balance, version FROM wallets WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((balance, version)) => WalletSnapshot {
                balance,
                version: Some(version),
            },
            None => WalletSnapshot {
                balance: 0,
                version: None,
            },
        })
    }

    /// Current balance; zero for users that were never credited.
    pub fn balance(&self, user_id: &str) -> Result<WalletBalance, CoreError> {
        validate_user_id(user_id)?;
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT balance, updated_at FROM wallets WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let (balance, updated_at) = match row {
            Some((balance, updated_at)) => {
                let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                    .map_err(|e| DatabaseError::Corrupt {
                        table: "wallets",
                        message: e.to_string(),
                    })?
                    .with_timezone(&Utc);
                (balance, Some(updated_at))
            }
            None => (0, None),
        };
        Ok(WalletBalance {
            user_id: user_id.to_string(),
            balance,
            updated_at,
        })
    }

    /// The user's most recent `limit` entries, oldest first.
    pub fn history(&self, user_id: &str, limit: u32) -> Result<Vec<AuditEntry>, CoreError> {
        validate_user_id(user_id)?;
        let mut stmt = self.db.conn().prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries
             WHERE user_id = ?1
             ORDER BY seq DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit], AuditRow::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        entries.reverse();
        Ok(entries)
    }

    /// Entries after `cursor` across all users, in creation order.
    ///
    /// Consumers of the "balance credited" feed pass the `seq` of the last
    /// entry they processed.
    pub fn entries_since(&self, cursor: i64, limit: u32) -> Result<Vec<AuditEntry>, CoreError> {
        let mut stmt = self.db.conn().prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries
             WHERE seq > ?1
             ORDER BY seq
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![cursor, limit], AuditRow::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }
}

fn validate_reason(reason: &str) -> Result<(), ValidationError> {
    if reason.trim().is_empty() {
        Err(ValidationError::value("reason", "must not be empty"))
    } else {
        Ok(())
    }
}

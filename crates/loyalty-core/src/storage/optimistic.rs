//! Optimistic read-compute-commit loop.
//!
//! An attempt reads its snapshot outside any transaction, computes the new
//! state purely from it, then commits inside an IMMEDIATE transaction whose
//! writes are guarded by the row versions it read. If any guard fails the
//! attempt reports [`Attempt::Conflict`] and the loop sleeps an exponential
//! backoff with jitter (via `backon`) before re-reading.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use super::Database;
use crate::error::{CoreError, DatabaseError};

/// Result of one read-compute-commit attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The attempt committed (or needed no write) and produced a value.
    Done(T),
    /// A concurrent writer changed a row this attempt depended on.
    Conflict,
}

/// Bounded retry budget for optimistic commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            min_delay_ms: 5,
            max_delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Backoff between attempts; yields `max_attempts - 1` delays.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

/// Run `attempt` until it completes or the retry budget is exhausted.
///
/// Lock contention surfacing from SQLite (busy/locked) is treated as a
/// conflict. Any other error, constraint violations included, is returned
/// immediately without retrying.
///
/// # Errors
/// [`CoreError::Transient`] when every attempt conflicted; otherwise the
/// first non-conflict error.
pub fn run_optimistic<T, F>(
    db: &Database,
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, CoreError>
where
    F: FnMut(&Database) -> Result<Attempt<T>, CoreError>,
{
    let mut delays = policy.backoff().build();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match attempt(db) {
            Ok(Attempt::Done(value)) => return Ok(value),
            Ok(Attempt::Conflict) => {}
            Err(CoreError::Database(DatabaseError::Locked)) => {}
            Err(e) => return Err(e),
        }

        match delays.next() {
            Some(delay) => {
                tracing::debug!(
                    operation,
                    attempts,
                    backoff_ms = %delay.as_millis(),
                    "optimistic commit conflicted, retrying after backoff"
                );
                std::thread::sleep(delay);
            }
            None => {
                tracing::warn!(operation, attempts, "optimistic retry budget exhausted");
                return Err(CoreError::Transient {
                    operation: operation.to_string(),
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_delay_ms: 0,
            max_delay_ms: 1,
        }
    }

    #[test]
    fn succeeds_after_transient_conflicts() {
        let db = Database::open_memory().unwrap();
        let mut calls = 0;
        let value = run_optimistic(&db, &fast_policy(5), "test", |_| {
            calls += 1;
            Ok(if calls < 3 {
                Attempt::Conflict
            } else {
                Attempt::Done(calls)
            })
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn exhaustion_is_transient_and_bounded() {
        let db = Database::open_memory().unwrap();
        let mut calls = 0;
        let err = run_optimistic::<(), _>(&db, &fast_policy(4), "credit", |_| {
            calls += 1;
            Ok(Attempt::Conflict)
        })
        .unwrap_err();
        assert_eq!(calls, 4);
        assert!(err.is_retryable());
        assert!(matches!(err, CoreError::Transient { attempts: 4, .. }));
    }

    #[test]
    fn busy_database_is_retried() {
        let db = Database::open_memory().unwrap();
        let mut calls = 0;
        let value = run_optimistic(&db, &fast_policy(3), "test", |_| {
            calls += 1;
            if calls == 1 {
                Err(CoreError::Database(DatabaseError::Locked))
            } else {
                Ok(Attempt::Done("ok"))
            }
        })
        .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls, 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let db = Database::open_memory().unwrap();
        let mut calls = 0;
        let err = run_optimistic::<(), _>(&db, &fast_policy(5), "test", |_| {
            calls += 1;
            Err(CoreError::NotFound {
                kind: "wallet",
                id: "u1".into(),
            })
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(!err.is_retryable());
    }

    #[test]
    fn constraint_violations_are_not_retried() {
        let db = Database::open_memory().unwrap();
        let mut calls = 0;
        let err = run_optimistic::<(), _>(&db, &fast_policy(5), "test", |_| {
            calls += 1;
            Err(CoreError::Database(DatabaseError::Constraint(
                "CHECK constraint failed: balance >= 0".into(),
            )))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, CoreError::Database(DatabaseError::Constraint(_))));
    }
}

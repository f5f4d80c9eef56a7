//! # Loyalty Core Library
//!
//! This library provides the rewards ledger behind the loyalty program:
//! daily-login streaks, lifetime-spend milestones, weekly streak bonuses and
//! atomic token crediting with an immutable audit trail. The `loyalty-cli`
//! binary is a thin shell over the same library.
//!
//! ## Architecture
//!
//! - **Ledger**: The only path that changes a wallet. Every credit appends
//!   one audit entry in the same transaction
//! - **Engines**: Streak, milestone, weekly sweep and freeze logic. Each one
//!   re-checks its "already awarded" guard inside the commit that pays
//! - **Storage**: SQLite with versioned rows and an optimistic
//!   read-compute-commit loop, plus TOML-based application configuration
//! - **Reward configuration**: Live-tunable amounts stored in the database
//!
//! ## Key Components
//!
//! - [`Ledger`]: Balance mutation, history and the audit feed
//! - [`StreakEngine`]: Login handling
//! - [`MilestoneEngine`] / [`SpendRecorder`]: Spend tracking and one-time awards
//! - [`WeeklyBonusSweeper`]: Scheduled weekly bonus
//! - [`FreezeController`]: Administrative streak freeze
//! - [`ConfigStore`]: Reward configuration
//! - [`Database`] / [`AppConfig`]: Persistence and operational settings

pub mod calendar;
pub mod error;
pub mod freeze;
pub mod ledger;
pub mod milestone;
pub mod profile;
pub mod reward_config;
pub mod storage;
pub mod streak;
pub mod sweeper;

pub use calendar::BusinessCalendar;
pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use freeze::{FreezeController, FreezeOutcome};
pub use ledger::{AuditAction, AuditEntry, Ledger, WalletBalance};
pub use milestone::{MilestoneAward, MilestoneEngine, SpendReceipt, SpendRecorder};
pub use profile::{validate_user_id, LoyaltyProfile, StreakInfo, Totals};
pub use reward_config::{
    ConfigStore, DailyConfig, DailyPatch, Milestone, RewardConfig, RewardConfigPatch, SpecialDay,
    WeeklyConfig, WeeklyPatch,
};
pub use storage::{AppConfig, Database, ProfileStore, RetryPolicy};
pub use streak::{next_streak_state, LoginDecision, LoginOutcome, StreakEngine, StreakState};
pub use sweeper::{run_daily, SweepReport, WeeklyBonusSweeper};

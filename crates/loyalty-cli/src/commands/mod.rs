pub mod config;
pub mod freeze;
pub mod ledger;
pub mod login;
pub mod spend;
pub mod sweep;

use chrono::{DateTime, Utc};
use loyalty_core::{AppConfig, BusinessCalendar, Database, RetryPolicy};
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Database plus the operational settings every command needs.
pub struct Context {
    pub db: Database,
    pub calendar: BusinessCalendar,
    pub retry: RetryPolicy,
    pub config: AppConfig,
}

impl Context {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = AppConfig::load_or_default();
        Ok(Self {
            db: Database::open()?,
            calendar: config.calendar()?,
            retry: config.retry_policy(),
            config,
        })
    }
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse an optional `--at` timestamp, defaulting to now.
pub fn instant(at: Option<&str>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match at {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .map_err(|e| format!("invalid --at '{raw}': {e}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

mod config;
pub mod database;
pub mod migrations;
pub mod optimistic;
pub mod profiles;

pub use config::{AppConfig, CalendarConfig, RetryConfig, SweeperConfig};
pub use database::Database;
pub use optimistic::{run_optimistic, Attempt, RetryPolicy};
pub use profiles::{ProfileSnapshot, ProfileStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the loyalty data directory, creating it if needed.
///
/// `LOYALTY_DATA_DIR` wins when set. Otherwise `~/.config/loyalty-ledger[-dev]/`
/// based on `LOYALTY_ENV` (set `LOYALTY_ENV=dev` for the development directory).
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("LOYALTY_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("LOYALTY_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("loyalty-ledger-dev")
            } else {
                base_dir.join("loyalty-ledger")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

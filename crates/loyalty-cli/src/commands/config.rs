use clap::Subcommand;
use loyalty_core::{AppConfig, ConfigStore, Database, RewardConfigPatch};

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "calendar.utc_offset_minutes", "sweeper.run_at")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
    /// Reward amounts stored in the ledger database
    Reward {
        #[command(subcommand)]
        action: RewardAction,
    },
}

#[derive(Subcommand)]
pub enum RewardAction {
    /// Print the current reward configuration
    Show,
    /// Merge a JSON patch, e.g. '{"daily":{"baseReward":75}}'
    Update {
        /// Patch document; omitted fields keep their current value
        patch: String,
    },
}

pub fn run(action: ConfigAction) -> CmdResult {
    match action {
        ConfigAction::Get { key } => {
            let config = AppConfig::load_or_default();
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = AppConfig::load()?;
            config.set(&key, &value)?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = AppConfig::load_or_default();
            print_json(&config)?;
        }
        ConfigAction::Reset => {
            AppConfig::default().save()?;
            println!("config reset to defaults");
        }
        ConfigAction::Reward { action } => {
            let db = Database::open()?;
            match action {
                RewardAction::Show => print_json(&ConfigStore::get(&db))?,
                RewardAction::Update { patch } => {
                    let patch: RewardConfigPatch = serde_json::from_str(&patch)?;
                    print_json(&ConfigStore::update(&db, &patch)?)?;
                }
            }
        }
    }
    Ok(())
}

//! Read-only views: balances, audit history and profiles.

use clap::Args;
use loyalty_core::{validate_user_id, Ledger, ProfileStore};

use super::{print_json, CmdResult, Context};

#[derive(Args)]
pub struct HistoryArgs {
    /// Only this user's entries (latest first page, oldest first)
    #[arg(long)]
    pub user: Option<String>,
    /// Global feed: entries after this sequence number
    #[arg(long, conflicts_with = "user")]
    pub since: Option<i64>,
    /// Maximum number of entries
    #[arg(long, default_value = "50")]
    pub limit: u32,
}

pub fn balance(user_id: &str) -> CmdResult {
    let ctx = Context::open()?;
    print_json(&Ledger::new(&ctx.db).balance(user_id)?)
}

pub fn history(args: HistoryArgs) -> CmdResult {
    let ctx = Context::open()?;
    let ledger = Ledger::new(&ctx.db);
    let entries = match args.user {
        Some(user) => ledger.history(&user, args.limit)?,
        None => ledger.entries_since(args.since.unwrap_or(0), args.limit)?,
    };
    print_json(&entries)
}

pub fn profile(user_id: &str) -> CmdResult {
    validate_user_id(user_id)?;
    let ctx = Context::open()?;
    let snapshot = ProfileStore::load(ctx.db.conn(), user_id)?;
    print_json(&snapshot.profile)
}

use clap::Args;
use loyalty_core::StreakEngine;

use super::{instant, print_json, CmdResult, Context};

#[derive(Args)]
pub struct LoginArgs {
    /// User ID
    pub user_id: String,
    /// Login time (RFC 3339); defaults to now
    #[arg(long)]
    pub at: Option<String>,
}

pub fn run(args: LoginArgs) -> CmdResult {
    let ctx = Context::open()?;
    let now = instant(args.at.as_deref())?;
    let outcome = StreakEngine::new(&ctx.db)
        .with_calendar(ctx.calendar)
        .with_retry(ctx.retry)
        .handle_login(&args.user_id, now)?;
    print_json(&outcome)
}

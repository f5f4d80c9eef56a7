use clap::Args;
use loyalty_core::FreezeController;

use super::{print_json, CmdResult, Context};

#[derive(Args)]
pub struct FreezeArgs {
    /// User ID
    pub user_id: String,
    /// Freeze length in days
    #[arg(long, allow_negative_numbers = true)]
    pub days: i64,
}

pub fn run(args: FreezeArgs) -> CmdResult {
    let ctx = Context::open()?;
    let outcome = FreezeController::new(&ctx.db)
        .with_retry(ctx.retry)
        .freeze(&args.user_id, args.days)?;
    print_json(&outcome)
}

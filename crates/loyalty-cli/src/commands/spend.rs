use clap::Args;
use loyalty_core::SpendRecorder;

use super::{print_json, CmdResult, Context};

#[derive(Args)]
pub struct SpendArgs {
    /// User ID
    pub user_id: String,
    /// Amount spent, in the smallest billing unit
    pub amount: i64,
    /// Payment reference; replays of the same reference are ignored
    #[arg(long)]
    pub reference: String,
}

pub fn run(args: SpendArgs) -> CmdResult {
    let ctx = Context::open()?;
    let receipt = SpendRecorder::new(&ctx.db)
        .with_retry(ctx.retry)
        .record_spend(&args.user_id, args.amount, &args.reference)?;
    print_json(&receipt)
}

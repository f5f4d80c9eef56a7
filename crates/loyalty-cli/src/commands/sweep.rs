use clap::Args;
use loyalty_core::{run_daily, WeeklyBonusSweeper};
use tokio::sync::watch;

use super::{instant, print_json, CmdResult, Context};

#[derive(Args)]
pub struct SweepArgs {
    /// Keep running and sweep every day at `sweeper.run_at`
    #[arg(long)]
    pub daemon: bool,
    /// Sweep as of this time (RFC 3339); defaults to now
    #[arg(long, conflicts_with = "daemon")]
    pub at: Option<String>,
}

pub fn run(args: SweepArgs) -> CmdResult {
    let ctx = Context::open()?;

    if !args.daemon {
        let now = instant(args.at.as_deref())?;
        let report = WeeklyBonusSweeper::new(&ctx.db)
            .with_calendar(ctx.calendar)
            .with_retry(ctx.retry)
            .with_page_size(ctx.config.sweeper.page_size)
            .sweep(now)?;
        return print_json(&report);
    }

    let db_path = ctx
        .db
        .path()
        .map(|p| p.to_path_buf())
        .ok_or("sweeper daemon needs a file-backed database")?;
    let config = ctx.config;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping sweeper");
                let _ = shutdown_tx.send(true);
            }
        });
        run_daily(db_path, config, shutdown_rx).await
    })?;
    Ok(())
}

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "loyalty-cli", version, about = "Loyalty ledger CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a login and pay the daily bonus
    Login(commands::login::LoginArgs),
    /// Record a spend event from billing
    Spend(commands::spend::SpendArgs),
    /// Freeze a user's streak
    Freeze(commands::freeze::FreezeArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Run the weekly bonus sweep
    Sweep(commands::sweep::SweepArgs),
    /// Show a user's balance
    Balance {
        /// User ID
        user_id: String,
    },
    /// Show audit entries
    History(commands::ledger::HistoryArgs),
    /// Show a user's loyalty profile
    Profile {
        /// User ID
        user_id: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOYALTY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Login(args) => commands::login::run(args),
        Commands::Spend(args) => commands::spend::run(args),
        Commands::Freeze(args) => commands::freeze::run(args),
        Commands::Config { action } => commands::config::run(action),
        Commands::Sweep(args) => commands::sweep::run(args),
        Commands::Balance { user_id } => commands::ledger::balance(&user_id),
        Commands::History(args) => commands::ledger::history(args),
        Commands::Profile { user_id } => commands::ledger::profile(&user_id),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

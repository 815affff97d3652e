use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ftk_portfolio::{Decimal, TradeAction};

mod commands;
mod wiring;

#[derive(Parser)]
#[command(name = "ftk")]
#[command(about = "FolioTrack trade ledger CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> env -> local...)
    #[arg(long = "config", global = true)]
    config_paths: Vec<PathBuf>,

    /// Fail on config keys nothing reads (default: warn)
    #[arg(long, global = true, default_value_t = false)]
    strict_config: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a BUY: opens a new FIFO lot
    Buy(TradeArgs),

    /// Record a SELL: consumes lots oldest first and realizes P&L
    Sell(TradeArgs),

    /// Trade history from the primary store, in application order
    History {
        #[arg(long)]
        ticker: Option<String>,
    },

    /// Realized P&L summary over stored disposals
    Pnl {
        #[arg(long)]
        ticker: Option<String>,
    },

    /// Open positions, valued at the given marks
    Positions {
        /// TICKER=PRICE, repeatable. Unmarked positions are reported at cost.
        #[arg(long = "mark")]
        marks: Vec<String>,
    },

    /// Derive and persist a portfolio snapshot
    Snapshot {
        /// TICKER=PRICE, repeatable
        #[arg(long = "mark")]
        marks: Vec<String>,

        /// Snapshot time (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Probe both stores and report the replication mode
    Health,

    /// Compare primary and secondary by trade id
    Reconcile {
        /// Re-send rows named by open write-skew markers first
        #[arg(long, default_value_t = false)]
        replay: bool,
    },

    /// Verify the hash chain of the local trade log
    VerifyLocal,

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
}

#[derive(clap::Args)]
struct TradeArgs {
    ticker: String,
    shares: Decimal,
    price: Decimal,

    #[arg(long, default_value = "USD")]
    currency: String,

    #[arg(long, default_value = "")]
    notes: String,

    /// Execution time (RFC 3339). Defaults to now.
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations to the configured (or FTK_DATABASE_URL) database
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let config = commands::ConfigArgs {
        paths: cli.config_paths,
        strict: cli.strict_config,
    };

    match cli.cmd {
        Commands::Buy(args) => {
            commands::ledger::record(&config, TradeAction::Buy, args.into()).await
        }
        Commands::Sell(args) => {
            commands::ledger::record(&config, TradeAction::Sell, args.into()).await
        }
        Commands::History { ticker } => commands::ledger::history(&config, ticker).await,
        Commands::Pnl { ticker } => commands::ledger::pnl(&config, ticker).await,
        Commands::Positions { marks } => commands::ledger::positions(&config, &marks).await,
        Commands::Snapshot { marks, at } => {
            commands::ledger::snapshot(&config, &marks, at.unwrap_or_else(Utc::now)).await
        }
        Commands::Health => commands::ledger::health(&config).await,
        Commands::Reconcile { replay } => commands::ledger::reconcile(&config, replay).await,
        Commands::VerifyLocal => commands::ledger::verify_local(&config),
        Commands::ConfigHash { paths } => {
            let loaded = ftk_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
            Ok(())
        }
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db::status(&config).await,
            DbCmd::Migrate => commands::db::migrate(&config).await,
        },
    }
}

impl From<TradeArgs> for commands::ledger::TradeInput {
    fn from(a: TradeArgs) -> Self {
        Self {
            ticker: a.ticker,
            shares: a.shares,
            price: a.price,
            currency: a.currency,
            notes: a.notes,
            at: a.at.unwrap_or_else(Utc::now),
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use steam_etl::cli::backfill::{self, BackfillCommandConfig};
use steam_etl::cli::fetch::{self, FetchCommandConfig};
use steam_etl::cli::init_db::{self, InitDbConfig};
use steam_etl::cli::exit_code_for;
use steam_etl::database_ops::upsert::AchievementWritePolicy;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "steam_etl", version, about = "Steam catalog & ownership ETL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Fetch appdetails + global achievements for --apps and/or the owned games of one account
    Fetch {
        /// Comma-separated appids, e.g. 570,730
        #[arg(long)]
        apps: Option<String>,
        /// Also fetch owned games (uses --steamid or STEAM_USER_ID64)
        #[arg(long, default_value_t = false)]
        owned: bool,
        /// SteamID64 for --owned
        #[arg(long)]
        steamid: Option<String>,
        /// Upstream requests per second
        #[arg(long, default_value_t = fetch::DEFAULT_FETCH_RPS)]
        rps: f64,
        /// Appids per appdetails request
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        /// merge (overwrite percent) or legacy-insert (keep existing rows)
        #[arg(long, default_value = "merge")]
        achievement_policy: AchievementWritePolicy,
    },
    /// Fetch appdetails for owned games missing from the catalog, then sync ownership names
    Backfill {
        #[arg(long, default_value_t = backfill::DEFAULT_BACKFILL_RPS)]
        rps: f64,
        /// Appids per committed chunk
        #[arg(long, default_value_t = 10)]
        chunk_size: usize,
    },
    /// Create the database and apply migrations
    InitDb {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = steam_etl::tracing::init_tracing("info,sqlx=warn") {
        eprintln!("{e}");
    }
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fetch {
            apps,
            owned,
            steamid,
            rps,
            batch_size,
            achievement_policy,
        } => fetch::run(FetchCommandConfig {
            apps,
            owned,
            steamid,
            rps: Some(rps),
            batch_size: Some(batch_size),
            achievement_policy: Some(achievement_policy),
        })
        .await
        .map(|_| ()),
        Commands::Backfill { rps, chunk_size } => backfill::run(BackfillCommandConfig {
            rps: Some(rps),
            chunk_size: Some(chunk_size),
        })
        .await
        .map(|_| ()),
        Commands::InitDb { db_url } => init_db::run(InitDbConfig {
            database_url: db_url,
        })
        .await
        .map(|_| ()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 2 {
                error!(error = %err, "configuration error");
                eprintln!("configuration error: {err:#}");
            } else {
                error!(error = %format!("{err:#}"), "steam_etl failed");
            }
            ExitCode::from(code)
        }
    }
}

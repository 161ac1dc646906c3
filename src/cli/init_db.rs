use anyhow::Result;
use tracing::info;

use crate::database_ops::db::{Db, TableCounts};
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct InitDbConfig {
    /// Optional override for `DATABASE_URL`.
    pub database_url: Option<String>,
}

/// Create the database file if needed and apply migrations. Needs no API key.
pub async fn run(cfg: InitDbConfig) -> Result<TableCounts> {
    env_util::init_env();
    let database_url = match cfg.database_url {
        Some(url) => env_util::normalize_sqlite_url(&url),
        None => env_util::db_url(),
    };

    let db = Db::connect(&database_url, 1).await?;
    db.migrate().await?;
    let counts = db.table_counts().await?;
    info!(
        games = counts.games,
        achievements = counts.achievements,
        ownerships = counts.ownerships,
        "schema ready"
    );
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(counts)
}

use anyhow::Result;

use crate::cli::{open_db, validate_rps, REQUIRED_KEYS, SNAPSHOT_KEYS};
use crate::config::{ConfigError, Settings};
use crate::database_ops::backfill::{backfill_missing_details, BackfillSummary, DEFAULT_CHUNK_SIZE};
use crate::database_ops::steam::client::{SteamClient, SteamClientConfig};
use crate::util::env as env_util;

/// Storefront appdetails is throttled harder than the Web API.
pub const DEFAULT_BACKFILL_RPS: f64 = 1.5;

#[derive(Debug, Clone, Default)]
pub struct BackfillCommandConfig {
    pub rps: Option<f64>,
    pub chunk_size: Option<usize>,
}

pub async fn run(cfg: BackfillCommandConfig) -> Result<BackfillSummary> {
    env_util::init_env();
    env_util::preflight_check("steam_etl backfill", REQUIRED_KEYS, SNAPSHOT_KEYS)
        .map_err(|_| ConfigError::MissingApiKey)?;

    let settings = Settings::from_env()?;
    let rps = validate_rps("--rps", cfg.rps.unwrap_or(DEFAULT_BACKFILL_RPS))?;
    let chunk_size = cfg.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
    if chunk_size == 0 {
        return Err(ConfigError::NonPositive("--chunk-size").into());
    }

    let db = open_db(&settings.database_url).await?;
    let mut client = SteamClient::new(SteamClientConfig::from_settings(&settings, rps))?;
    let summary = backfill_missing_details(&mut client, &db, chunk_size).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

use anyhow::Result;
use tracing::info;

use crate::cli::{open_db, validate_rps, REQUIRED_KEYS, SNAPSHOT_KEYS};
use crate::config::{parse_app_ids, ConfigError, Settings};
use crate::database_ops::steam::client::{SteamClient, SteamClientConfig, DEFAULT_BATCH_SIZE};
use crate::database_ops::upsert::AchievementWritePolicy;
use crate::orchestrator::{run_fetch, FetchPlan, RunSummary};
use crate::util::env as env_util;

pub const DEFAULT_FETCH_RPS: f64 = 2.0;

#[derive(Debug, Clone, Default)]
pub struct FetchCommandConfig {
    /// Comma-separated appids for catalog details and achievements.
    pub apps: Option<String>,
    /// Also fetch the owned-games list of one account.
    pub owned: bool,
    /// Account for `owned`; falls back to `STEAM_USER_ID64`.
    pub steamid: Option<String>,
    pub rps: Option<f64>,
    pub batch_size: Option<usize>,
    pub achievement_policy: Option<AchievementWritePolicy>,
}

/// Turn operator input into a [`FetchPlan`] without touching the network.
pub fn build_plan(
    cfg: &FetchCommandConfig,
    default_steamid: Option<&str>,
) -> Result<FetchPlan, ConfigError> {
    let app_ids = match cfg.apps.as_deref() {
        Some(raw) => parse_app_ids(raw)?,
        None => Vec::new(),
    };

    let owned_steamid = if cfg.owned {
        let steamid = cfg
            .steamid
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(default_steamid)
            .ok_or(ConfigError::MissingSteamId)?;
        Some(steamid.to_string())
    } else {
        None
    };

    if app_ids.is_empty() && owned_steamid.is_none() {
        return Err(ConfigError::NothingToFetch);
    }

    Ok(FetchPlan {
        app_ids,
        owned_steamid,
        batch_size: cfg.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
        achievement_policy: cfg.achievement_policy.unwrap_or_default(),
    })
}

pub async fn run(cfg: FetchCommandConfig) -> Result<RunSummary> {
    env_util::init_env();
    env_util::preflight_check("steam_etl fetch", REQUIRED_KEYS, SNAPSHOT_KEYS)
        .map_err(|_| ConfigError::MissingApiKey)?;

    let settings = Settings::from_env()?;
    let rps = validate_rps("--rps", cfg.rps.unwrap_or(DEFAULT_FETCH_RPS))?;
    let plan = build_plan(&cfg, settings.steam_user_id64.as_deref())?;
    info!(
        apps = plan.app_ids.len(),
        owned = plan.owned_steamid.is_some(),
        batch_size = plan.batch_size,
        policy = %plan.achievement_policy,
        rps,
        "fetch plan ready"
    );

    let db = open_db(&settings.database_url).await?;
    let mut client = SteamClient::new(SteamClientConfig::from_settings(&settings, rps))?;
    let summary = run_fetch(&mut client, &db, &plan).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

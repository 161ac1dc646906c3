//! One fetch run: catalog details, global achievements and account
//! ownership, written through a single transaction.
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqliteConnection;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::database_ops::db::Db;
use crate::database_ops::steam::client::{SteamClient, DEFAULT_BATCH_SIZE};
use crate::database_ops::steam::transform::{
    transform_app_details, transform_global_achievements, transform_owned_games,
};
use crate::database_ops::upsert::{
    merge_catalog_entries, merge_ownership_records, write_achievement_stats,
    AchievementWritePolicy,
};

/// What a run should fetch. Built from validated operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub app_ids: Vec<i64>,
    pub owned_steamid: Option<String>,
    pub batch_size: usize,
    pub achievement_policy: AchievementWritePolicy,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            app_ids: Vec::new(),
            owned_steamid: None,
            batch_size: DEFAULT_BATCH_SIZE,
            achievement_policy: AchievementWritePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub apps_requested: usize,
    pub appdetails_entries: usize,
    pub games_upserted: usize,
    pub achievement_apps: usize,
    /// Rows merged, or rows queued under the legacy insert policy.
    pub achievements_written: usize,
    pub ownerships_upserted: usize,
    pub elapsed_ms: u64,
}

/// Execute `plan`. Everything is committed together at the end; any
/// upstream or database error rolls the whole run back.
#[instrument(
    skip(client, db, plan),
    fields(apps = plan.app_ids.len(), owned = plan.owned_steamid.is_some())
)]
pub async fn run_fetch(client: &mut SteamClient, db: &Db, plan: &FetchPlan) -> Result<RunSummary> {
    let started = Instant::now();
    let mut tx = db.begin().await?;

    match fetch_into(client, &mut tx, plan).await {
        Ok(mut summary) => {
            tx.commit().await.context("committing fetch run")?;
            summary.elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                games = summary.games_upserted,
                achievements = summary.achievements_written,
                ownerships = summary.ownerships_upserted,
                elapsed_ms = summary.elapsed_ms,
                "fetch run committed"
            );
            Ok(summary)
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "fetch run failed; rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn fetch_into(
    client: &mut SteamClient,
    conn: &mut SqliteConnection,
    plan: &FetchPlan,
) -> Result<RunSummary> {
    let mut summary = RunSummary {
        apps_requested: plan.app_ids.len(),
        ..RunSummary::default()
    };

    if !plan.app_ids.is_empty() {
        let details = client
            .fetch_app_details(&plan.app_ids, plan.batch_size)
            .await
            .context("fetching appdetails")?;
        summary.appdetails_entries = details.len();
        let games = transform_app_details(&details);
        summary.games_upserted = merge_catalog_entries(conn, &games).await?;

        for &appid in &plan.app_ids {
            let response = client
                .fetch_global_achievements(appid)
                .await
                .with_context(|| format!("fetching global achievements for appid={appid}"))?;
            let achievements = transform_global_achievements(appid, &response);
            summary.achievements_written +=
                write_achievement_stats(conn, &achievements, plan.achievement_policy).await?;
            summary.achievement_apps += 1;
        }
    }

    if let Some(steamid) = plan.owned_steamid.as_deref() {
        let response = client
            .fetch_owned_games(steamid)
            .await
            .context("fetching owned games")?;
        let ownerships = transform_owned_games(steamid, &response);
        summary.ownerships_upserted = merge_ownership_records(conn, &ownerships).await?;
    }

    Ok(summary)
}

//! Idempotent writers for the three catalog tables.
//!
//! Every function runs on a caller-provided connection so the caller's
//! transaction decides when work becomes durable.
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use crate::database_ops::models::{AchievementStat, CatalogEntry, OwnershipRecord};

/// How global achievement rows are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AchievementWritePolicy {
    /// Insert or overwrite `percent` on `(appid, name)`.
    #[default]
    Merge,
    /// Insert and let the unique constraint drop duplicates. Existing rows
    /// keep their old percentage.
    LegacyInsertIgnore,
}

impl FromStr for AchievementWritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "legacy-insert" | "legacy_insert" | "insert-ignore" => Ok(Self::LegacyInsertIgnore),
            other => Err(format!(
                "unknown achievement policy {other:?} (expected merge or legacy-insert)"
            )),
        }
    }
}

impl fmt::Display for AchievementWritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AchievementWritePolicy::Merge => write!(f, "merge"),
            AchievementWritePolicy::LegacyInsertIgnore => write!(f, "legacy-insert"),
        }
    }
}

/// Insert or overwrite name/type/is_free, refreshing `updated_at`.
/// Rows with a zero id or blank name are skipped and not counted.
#[instrument(skip_all, fields(rows = games.len()))]
pub async fn merge_catalog_entries(
    conn: &mut SqliteConnection,
    games: &[CatalogEntry],
) -> Result<usize> {
    let now = Utc::now();
    let mut count = 0usize;
    for game in games {
        if game.appid == 0 || game.name.trim().is_empty() {
            debug!(appid = game.appid, "skipping invalid game row");
            continue;
        }
        sqlx::query(
            "INSERT INTO games (appid, name, type, is_free, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (appid) DO UPDATE SET \
                name = excluded.name, \
                type = excluded.type, \
                is_free = excluded.is_free, \
                updated_at = excluded.updated_at",
        )
        .bind(game.appid)
        .bind(&game.name)
        .bind(&game.category)
        .bind(game.is_free)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("merging game appid={}", game.appid))?;
        count += 1;
    }
    info!(count, "upserted games");
    Ok(count)
}

/// Insert or overwrite playtime and cached name on `(steamid, appid)`.
#[instrument(skip_all, fields(rows = ownerships.len()))]
pub async fn merge_ownership_records(
    conn: &mut SqliteConnection,
    ownerships: &[OwnershipRecord],
) -> Result<usize> {
    let now = Utc::now();
    let mut count = 0usize;
    for own in ownerships {
        if own.steamid.trim().is_empty() || own.appid == 0 {
            debug!(steamid = %own.steamid, appid = own.appid, "skipping invalid ownership row");
            continue;
        }
        sqlx::query(
            "INSERT INTO ownerships (steamid, appid, game_name, playtime_forever, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (steamid, appid) DO UPDATE SET \
                game_name = excluded.game_name, \
                playtime_forever = excluded.playtime_forever, \
                updated_at = excluded.updated_at",
        )
        .bind(&own.steamid)
        .bind(own.appid)
        .bind(&own.game_name)
        .bind(own.playtime_forever)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("merging ownership steamid={} appid={}", own.steamid, own.appid))?;
        count += 1;
    }
    info!(count, "upserted ownerships");
    Ok(count)
}

/// Authoritative achievement write: insert or overwrite `percent`.
#[instrument(skip_all, fields(rows = achievements.len()))]
pub async fn merge_achievement_stats(
    conn: &mut SqliteConnection,
    achievements: &[AchievementStat],
) -> Result<usize> {
    let now = Utc::now();
    let mut count = 0usize;
    for ach in achievements {
        if ach.appid == 0 || ach.name.is_empty() {
            debug!(appid = ach.appid, "skipping invalid achievement row");
            continue;
        }
        sqlx::query(
            "INSERT INTO achievements_global (appid, name, percent, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (appid, name) DO UPDATE SET \
                percent = excluded.percent, \
                updated_at = excluded.updated_at",
        )
        .bind(ach.appid)
        .bind(&ach.name)
        .bind(ach.percent)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("merging achievement appid={} name={}", ach.appid, ach.name))?;
        count += 1;
    }
    info!(count, "upserted achievements");
    Ok(count)
}

/// Legacy achievement write. Duplicates are silently discarded by the
/// unique constraint, so the returned count is rows *queued*, which can
/// overstate rows actually stored.
#[instrument(skip_all, fields(rows = achievements.len()))]
pub async fn insert_achievement_stats_ignoring_conflicts(
    conn: &mut SqliteConnection,
    achievements: &[AchievementStat],
) -> Result<usize> {
    let now = Utc::now();
    let mut queued = 0usize;
    for ach in achievements {
        if ach.appid == 0 || ach.name.is_empty() {
            debug!(appid = ach.appid, "skipping invalid achievement row");
            continue;
        }
        sqlx::query(
            "INSERT OR IGNORE INTO achievements_global (appid, name, percent, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ach.appid)
        .bind(&ach.name)
        .bind(ach.percent)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("inserting achievement appid={} name={}", ach.appid, ach.name))?;
        queued += 1;
    }
    info!(queued, "queued achievement rows for insert (duplicates ignored)");
    Ok(queued)
}

/// Dispatch to the writer selected by `policy`.
pub async fn write_achievement_stats(
    conn: &mut SqliteConnection,
    achievements: &[AchievementStat],
    policy: AchievementWritePolicy,
) -> Result<usize> {
    match policy {
        AchievementWritePolicy::Merge => merge_achievement_stats(conn, achievements).await,
        AchievementWritePolicy::LegacyInsertIgnore => {
            insert_achievement_stats_ignoring_conflicts(conn, achievements).await
        }
    }
}

/// Owned appids that have no `games` row yet, ascending.
pub async fn missing_catalog_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT o.appid FROM ownerships o \
         LEFT JOIN games g ON g.appid = o.appid \
         WHERE g.appid IS NULL \
         ORDER BY o.appid",
    )
    .fetch_all(&mut *conn)
    .await
    .context("listing owned apps without catalog details")?;
    Ok(ids)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NameSyncSummary {
    /// Ownership rows that received the catalog name.
    pub named: u64,
    /// Rows still without a catalog entry, marked `Unknown Game (<appid>)`.
    pub unknown: u64,
}

/// Copy catalog names onto ownership rows whose cached name is missing or a
/// previous `Unknown Game` marker.
#[instrument(skip_all)]
pub async fn sync_ownership_names(conn: &mut SqliteConnection) -> Result<NameSyncSummary> {
    const NEEDS_NAME: &str =
        "(game_name IS NULL OR game_name = '' OR game_name LIKE 'Unknown Game%')";
    let now = Utc::now();

    let named = sqlx::query(&format!(
        "UPDATE ownerships \
         SET game_name = (SELECT g.name FROM games g WHERE g.appid = ownerships.appid), \
             updated_at = ? \
         WHERE {NEEDS_NAME} \
           AND EXISTS (SELECT 1 FROM games g WHERE g.appid = ownerships.appid)"
    ))
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("syncing ownership names from games")?
    .rows_affected();

    let unknown = sqlx::query(&format!(
        "UPDATE ownerships \
         SET game_name = 'Unknown Game (' || appid || ')', updated_at = ? \
         WHERE {NEEDS_NAME} \
           AND game_name IS NOT ('Unknown Game (' || appid || ')') \
           AND NOT EXISTS (SELECT 1 FROM games g WHERE g.appid = ownerships.appid)"
    ))
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("marking ownerships without catalog entries")?
    .rows_affected();

    info!(named, unknown, "synced ownership names");
    Ok(NameSyncSummary { named, unknown })
}

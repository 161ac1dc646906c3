//! Catalog backfill for owned titles that were never fetched.
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::database_ops::db::Db;
use crate::database_ops::steam::client::SteamClient;
use crate::database_ops::steam::transform::transform_app_details;
use crate::database_ops::upsert::{
    merge_catalog_entries, missing_catalog_ids, sync_ownership_names, NameSyncSummary,
};

pub const DEFAULT_CHUNK_SIZE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillSummary {
    pub missing: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub games_upserted: usize,
    pub names: NameSyncSummary,
}

/// Fetch details for every owned appid without a `games` row, `chunk_size`
/// ids at a time (one id per upstream request), then refresh the cached
/// names on ownership rows. Each chunk commits on its own; a failed chunk is
/// logged and skipped.
#[instrument(skip(client, db))]
pub async fn backfill_missing_details(
    client: &mut SteamClient,
    db: &Db,
    chunk_size: usize,
) -> Result<BackfillSummary> {
    let missing = {
        let mut conn = db.pool.acquire().await.context("acquiring connection")?;
        missing_catalog_ids(&mut conn).await?
    };
    let mut summary = BackfillSummary {
        missing: missing.len(),
        ..BackfillSummary::default()
    };
    info!(missing = missing.len(), "owned apps without catalog details");

    for (idx, chunk) in missing.chunks(chunk_size.max(1)).enumerate() {
        summary.chunks += 1;
        match backfill_chunk(client, db, chunk).await {
            Ok(count) => {
                summary.games_upserted += count;
                info!(chunk = idx, ids = chunk.len(), count, "backfilled chunk");
            }
            Err(err) => {
                summary.failed_chunks += 1;
                warn!(chunk = idx, ids = ?chunk, error = %format!("{err:#}"), "backfill chunk failed; skipping");
            }
        }
    }

    let mut tx = db.begin().await?;
    summary.names = sync_ownership_names(&mut tx).await?;
    tx.commit().await.context("committing name sync")?;

    info!(
        games = summary.games_upserted,
        failed_chunks = summary.failed_chunks,
        named = summary.names.named,
        unknown = summary.names.unknown,
        "backfill finished"
    );
    Ok(summary)
}

async fn backfill_chunk(client: &mut SteamClient, db: &Db, ids: &[i64]) -> Result<usize> {
    let details = client
        .fetch_app_details(ids, 1)
        .await
        .context("fetching appdetails")?;
    let games = transform_app_details(&details);
    let mut tx = db.begin().await?;
    let count = merge_catalog_entries(&mut tx, &games).await?;
    tx.commit().await.context("committing backfill chunk")?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::models::{CatalogEntry, NameOrigin, OwnershipRecord};
    use crate::database_ops::steam::client::test_client;
    use crate::database_ops::upsert::merge_ownership_records;
    use httpmock::prelude::*;
    use serde_json::json;

    async fn seeded_db() -> Db {
        let db = Db::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();
        merge_catalog_entries(
            &mut conn,
            &[CatalogEntry {
                appid: 570,
                name: "Dota 2".into(),
                name_origin: NameOrigin::Upstream,
                category: None,
                is_free: Some(true),
            }],
        )
        .await
        .unwrap();
        let owned: Vec<OwnershipRecord> = [570, 730, 440]
            .into_iter()
            .map(|appid| OwnershipRecord {
                steamid: "76561197960287930".into(),
                appid,
                game_name: None,
                playtime_forever: Some(1),
            })
            .collect();
        merge_ownership_records(&mut conn, &owned).await.unwrap();
        db
    }

    #[tokio::test]
    async fn failed_chunks_are_skipped_and_names_synced() {
        let server = MockServer::start_async().await;
        let cs = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "730");
                then.status(200).json_body(json!({
                    "730": {"success": true, "data": {"name": "Counter-Strike 2", "type": "game"}}
                }));
            })
            .await;
        let tf = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "440");
                then.status(404);
            })
            .await;

        let db = seeded_db().await;
        let mut client = test_client(&server.base_url());
        let summary = backfill_missing_details(&mut client, &db, 1).await.unwrap();

        cs.assert_hits_async(1).await;
        tf.assert_hits_async(1).await;
        assert_eq!(
            summary,
            BackfillSummary {
                missing: 2,
                chunks: 2,
                failed_chunks: 1,
                games_upserted: 1,
                names: NameSyncSummary { named: 2, unknown: 1 },
            }
        );

        let names: Vec<(i64, Option<String>)> =
            sqlx::query_as("SELECT appid, game_name FROM ownerships ORDER BY appid")
                .fetch_all(&db.pool)
                .await
                .unwrap();
        assert_eq!(
            names,
            vec![
                (440, Some("Unknown Game (440)".to_string())),
                (570, Some("Dota 2".to_string())),
                (730, Some("Counter-Strike 2".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn nothing_missing_means_no_upstream_calls() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).json_body(json!({}));
            })
            .await;

        let db = Db::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let mut client = test_client(&server.base_url());
        let summary = backfill_missing_details(&mut client, &db, DEFAULT_CHUNK_SIZE)
            .await
            .unwrap();

        any.assert_hits_async(0).await;
        assert_eq!(summary, BackfillSummary::default());
    }
}

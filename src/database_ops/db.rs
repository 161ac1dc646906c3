use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use tracing::{info, instrument};

static MIGRATIONS: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid DATABASE_URL")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .context("failed to open database")?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Private in-memory database. Connections of the pool share it, and it
    /// lives as long as the pool keeps one connection open.
    #[cfg(test)]
    pub(crate) async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory database")?;
        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations (idempotent).
    pub async fn migrate(&self) -> Result<()> {
        info!("running migrations");
        MIGRATIONS
            .run(&self.pool)
            .await
            .context("failed to apply migrations")?;
        Ok(())
    }

    /// Open the transaction a run writes through. Dropping it without
    /// `commit()` rolls everything back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("failed to begin transaction")
    }

    /// Row counts of the three tables, for run summaries.
    pub async fn table_counts(&self) -> Result<TableCounts> {
        let (games, achievements, ownerships): (i64, i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM games), \
                    (SELECT COUNT(*) FROM achievements_global), \
                    (SELECT COUNT(*) FROM ownerships)",
        )
        .fetch_one(&self.pool)
        .await
        .context("counting rows")?;
        Ok(TableCounts {
            games,
            achievements,
            ownerships,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TableCounts {
    pub games: i64,
    pub achievements: i64,
    pub ownerships: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent_and_tables_start_empty() {
        let db = Db::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.table_counts().await.unwrap(), TableCounts::default());
    }

    #[tokio::test]
    async fn rolled_back_transactions_leave_no_rows() {
        let db = Db::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let mut tx = db.begin().await.unwrap();
        sqlx::query(
            "INSERT INTO games (appid, name, created_at, updated_at) \
             VALUES (1, 'x', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)",
        )
        .execute(&mut *tx)
        .await
        .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(db.table_counts().await.unwrap().games, 0);
    }

    #[tokio::test]
    async fn natural_keys_are_unique() {
        let db = Db::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let insert = "INSERT INTO ownerships (steamid, appid, created_at, updated_at) \
                      VALUES ('1', 570, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)";
        sqlx::query(insert).execute(&db.pool).await.unwrap();
        assert!(sqlx::query(insert).execute(&db.pool).await.is_err());
    }
}

pub mod backfill;
pub mod fetch;
pub mod init_db;

use anyhow::Result;

use crate::config::ConfigError;
use crate::database_ops::db::Db;
use crate::util::env as env_util;

/// Keys without which no upstream command can start.
pub(crate) const REQUIRED_KEYS: &[&str] = &["STEAM_API_KEY"];

/// Keys logged (redacted) by every command's preflight snapshot.
pub(crate) const SNAPSHOT_KEYS: &[&str] = &[
    "STEAM_API_KEY",
    "DATABASE_URL",
    "STEAM_USER_ID64",
    "STEAM_HTTP_TIMEOUT_SECS",
    "STEAM_API_BASE_URL",
    "STEAM_STORE_BASE_URL",
    "AUTO_MIGRATE",
    "LOG_LEVEL",
];

/// Open the store with a single connection and, unless `AUTO_MIGRATE=0`,
/// bring the schema up to date.
pub(crate) async fn open_db(database_url: &str) -> Result<Db> {
    let db = Db::connect(database_url, 1).await?;
    if env_util::env_flag("AUTO_MIGRATE", true) {
        db.migrate().await?;
    }
    Ok(db)
}

/// Process exit code for a failed command: 2 for operator configuration
/// problems, 1 for everything else.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else {
        1
    }
}

/// Requests per second must be a positive finite number.
pub fn validate_rps(flag: &'static str, rps: f64) -> Result<f64, ConfigError> {
    if rps.is_finite() && rps > 0.0 {
        Ok(rps)
    } else {
        Err(ConfigError::NonPositive(flag))
    }
}

pub mod backfill;
pub mod db;
pub mod models;
pub mod steam;
pub mod upsert;

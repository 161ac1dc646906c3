#[cfg(test)]
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Storage limits shared by transformers and the schema.
pub const NAME_MAX_CHARS: usize = 255;
pub const CATEGORY_MAX_CHARS: usize = 64;

/// Where a catalog name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NameOrigin {
    Upstream,
    Placeholder,
}

/// One storefront title, keyed by `appid`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub appid: i64,
    pub name: String,
    pub name_origin: NameOrigin,
    /// Storefront `type` (game, dlc, demo, ...).
    pub category: Option<String>,
    pub is_free: Option<bool>,
}

/// Global completion percentage of one achievement, keyed by `(appid, name)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementStat {
    pub appid: i64,
    pub name: String,
    pub percent: f64,
}

/// A title in an account's library, keyed by `(steamid, appid)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipRecord {
    pub steamid: String,
    pub appid: i64,
    pub game_name: Option<String>,
    /// Minutes, never negative.
    pub playtime_forever: Option<i64>,
}

/// Stored `games` row, read back by tests.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct GameRow {
    pub appid: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    pub category: Option<String>,
    pub is_free: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored `achievements_global` row, read back by tests.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AchievementRow {
    pub id: i64,
    pub appid: i64,
    pub name: String,
    pub percent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored `ownerships` row, read back by tests.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OwnershipRow {
    pub id: i64,
    pub steamid: String,
    pub appid: i64,
    pub game_name: Option<String>,
    pub playtime_forever: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Char-boundary safe prefix of at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::truncate_chars;

    #[test]
    fn truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("ÅÄÖ", 2), "ÅÄ");
        assert_eq!(truncate_chars("short", 255), "short");
        assert_eq!(truncate_chars(&"x".repeat(300), 255).len(), 255);
    }
}

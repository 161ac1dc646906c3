//! Pure mapping from decoded Steam payloads to domain records.
//!
//! Nothing here fails: entries that do not validate are logged at debug
//! level and left out of the output.
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::payload::{AchievementEntry, AppDetailsEnvelope, OwnedGameEntry};
use crate::database_ops::models::{
    truncate_chars, AchievementStat, CatalogEntry, NameOrigin, OwnershipRecord, CATEGORY_MAX_CHARS,
    NAME_MAX_CHARS,
};

/// How a catalog name was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOutcome {
    /// Upstream supplied a usable name (trimmed, truncated).
    Named(String),
    /// Upstream sent no name at all; `"App {id}"` stands in.
    PlaceholderGenerated(i64),
    /// A name was sent but is blank once trimmed.
    Rejected,
}

impl NameOutcome {
    pub fn resolve(appid: i64, raw: Option<&str>) -> Self {
        match raw {
            None | Some("") => NameOutcome::PlaceholderGenerated(appid),
            Some(name) => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    NameOutcome::Rejected
                } else {
                    NameOutcome::Named(truncate_chars(trimmed, NAME_MAX_CHARS))
                }
            }
        }
    }

    pub fn into_name(self) -> Option<(String, NameOrigin)> {
        match self {
            NameOutcome::Named(name) => Some((name, NameOrigin::Upstream)),
            NameOutcome::PlaceholderGenerated(appid) => {
                Some((format!("App {appid}"), NameOrigin::Placeholder))
            }
            NameOutcome::Rejected => None,
        }
    }
}

/// Map an appdetails response (`{"<appid>": {success, data}}`) to catalog entries.
pub fn transform_app_details(appdetails: &Map<String, Value>) -> Vec<CatalogEntry> {
    let mut games = Vec::with_capacity(appdetails.len());
    for (appid_str, payload) in appdetails {
        let Ok(appid) = appid_str.trim().parse::<i64>() else {
            debug!(key = %appid_str, "steam: skipping invalid appid key");
            continue;
        };
        let Some(envelope) = AppDetailsEnvelope::decode(payload) else {
            debug!(appid, "steam: no appdetails envelope");
            continue;
        };
        if !envelope.succeeded() {
            debug!(appid, "steam: success=false");
            continue;
        }
        let Some(data) = envelope.data() else {
            debug!(appid, "steam: appdetails without data");
            continue;
        };

        let raw_name = data.name.as_ref().and_then(|n| n.as_text());
        let Some((name, name_origin)) = NameOutcome::resolve(appid, raw_name.as_deref()).into_name()
        else {
            debug!(appid, "steam: skipping app with blank name");
            continue;
        };
        let category = data
            .kind
            .as_ref()
            .and_then(|k| k.as_text())
            .filter(|k| !k.is_empty())
            .map(|k| truncate_chars(&k, CATEGORY_MAX_CHARS));
        let is_free = data.is_free.as_ref().map(|f| f.truthy());

        games.push(CatalogEntry {
            appid,
            name,
            name_origin,
            category,
            is_free,
        });
    }
    info!(count = games.len(), "transformed games from appdetails");
    games
}

/// Map a global achievement percentage response for `appid`.
pub fn transform_global_achievements(appid: i64, response: &Value) -> Vec<AchievementStat> {
    let mut achievements = Vec::new();
    for item in AchievementEntry::decode_all(response) {
        let (Some(name), Some(percent)) = (item.name.as_ref(), item.percent.as_ref()) else {
            debug!(appid, "steam: skipping achievement with missing name/percent");
            continue;
        };
        let Some(name) = name.as_text() else {
            debug!(appid, "steam: skipping achievement with non-text name");
            continue;
        };
        let Some(p) = percent.as_f64() else {
            debug!(appid, percent = ?percent, "steam: skipping achievement with non-numeric percent");
            continue;
        };
        if !(0.0..=100.0).contains(&p) {
            debug!(appid, percent = p, "steam: skipping achievement percent out of range");
            continue;
        }
        achievements.push(AchievementStat {
            appid,
            name: truncate_chars(&name, NAME_MAX_CHARS),
            percent: p,
        });
    }
    info!(appid, count = achievements.len(), "transformed global achievements");
    achievements
}

/// Map an owned-games response for one account.
pub fn transform_owned_games(steamid: &str, response: &Value) -> Vec<OwnershipRecord> {
    let mut ownerships = Vec::new();
    for game in OwnedGameEntry::decode_all(response) {
        let Some(raw_appid) = game.appid.as_ref() else {
            debug!("steam: skipping owned game with missing appid");
            continue;
        };
        let Some(appid) = raw_appid.as_i64() else {
            debug!(appid = ?raw_appid, "steam: skipping owned game with non-integer appid");
            continue;
        };

        let playtime_forever = match game.playtime_forever.as_ref() {
            None => None,
            Some(raw) => match raw.as_i64() {
                Some(pt) if pt < 0 => {
                    debug!(appid, playtime = pt, "steam: clamping negative playtime to 0");
                    Some(0)
                }
                Some(pt) => Some(pt),
                None => {
                    debug!(appid, playtime = ?raw, "steam: ignoring non-integer playtime");
                    None
                }
            },
        };

        let game_name = game
            .name
            .as_ref()
            .and_then(|n| n.as_text())
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .map(|n| truncate_chars(&n, NAME_MAX_CHARS));

        ownerships.push(OwnershipRecord {
            steamid: steamid.to_string(),
            appid,
            game_name,
            playtime_forever,
        });
    }
    info!(steamid, count = ownerships.len(), "transformed ownership rows");
    ownerships
}

//! Typed views over the three upstream response shapes.
//!
//! Every field is optional and scalars that Steam sends inconsistently
//! (numbers as strings, ids as garbage) decode into [`Scalar`], so a bad
//! field never fails a whole response. Coercion rules live here; the
//! transformers only decide what to keep.
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// A JSON scalar as upstream actually sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Other(Value),
}

impl Scalar {
    /// Integral view: integers, finite floats (truncated) and numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => {
                Some(f.trunc() as i64)
            }
            Scalar::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Float view: numbers and numeric strings. Non-finite results are refused.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Scalar::Int(i) => *i as f64,
            Scalar::Float(f) => *f,
            Scalar::Text(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Textual view: strings as-is, numbers rendered.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }

    /// Truthiness the way loosely typed upstream flags are meant.
    pub fn truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Int(i) => *i != 0,
            Scalar::Float(f) => *f != 0.0,
            Scalar::Text(s) => !s.is_empty(),
            Scalar::Other(v) => match v {
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                _ => false,
            },
        }
    }
}

/// One value of the appdetails map: `{ "success": bool, "data": {...} }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDetailsEnvelope {
    #[serde(default)]
    pub success: Option<Scalar>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// The part of `data` the catalog keeps.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDetailsData {
    #[serde(default)]
    pub name: Option<Scalar>,
    #[serde(default, rename = "type")]
    pub kind: Option<Scalar>,
    #[serde(default)]
    pub is_free: Option<Scalar>,
}

impl AppDetailsEnvelope {
    pub fn decode(raw: &Value) -> Option<Self> {
        decode_logged(raw, "appdetails entry")
    }

    pub fn succeeded(&self) -> bool {
        self.success.as_ref().is_some_and(Scalar::truthy)
    }

    /// The `data` object, if present and shaped like one.
    pub fn data(&self) -> Option<AppDetailsData> {
        let data = self.data.as_ref().filter(|v| v.is_object())?;
        decode_logged(data, "appdetails data")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AchievementPercentagesResponse {
    #[serde(default)]
    achievementpercentages: Option<AchievementPercentages>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AchievementPercentages {
    #[serde(default)]
    achievements: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AchievementEntry {
    #[serde(default)]
    pub name: Option<Scalar>,
    #[serde(default)]
    pub percent: Option<Scalar>,
}

impl AchievementEntry {
    /// Entries of `achievementpercentages.achievements`; anything that is not
    /// an object is dropped.
    pub fn decode_all(raw: &Value) -> Vec<AchievementEntry> {
        let Some(resp) = decode_logged::<AchievementPercentagesResponse>(raw, "achievements response")
        else {
            return Vec::new();
        };
        resp.achievementpercentages
            .and_then(|p| p.achievements)
            .unwrap_or_default()
            .iter()
            .filter_map(|item| decode_logged(item, "achievement entry"))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OwnedGamesResponse {
    #[serde(default)]
    response: Option<OwnedGamesBody>,
    #[serde(default)]
    games: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OwnedGamesBody {
    #[serde(default)]
    games: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OwnedGameEntry {
    #[serde(default)]
    pub appid: Option<Scalar>,
    #[serde(default)]
    pub name: Option<Scalar>,
    #[serde(default)]
    pub playtime_forever: Option<Scalar>,
}

impl OwnedGameEntry {
    /// Entries of `response.games`; a bare top-level `games` list is accepted too.
    pub fn decode_all(raw: &Value) -> Vec<OwnedGameEntry> {
        let Some(resp) = decode_logged::<OwnedGamesResponse>(raw, "owned games response") else {
            return Vec::new();
        };
        resp.response
            .and_then(|r| r.games)
            .or(resp.games)
            .unwrap_or_default()
            .iter()
            .filter_map(|item| decode_logged(item, "owned game entry"))
            .collect()
    }
}

fn decode_logged<T>(raw: &Value, what: &'static str) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    if raw.is_null() {
        return None;
    }
    match T::deserialize(raw) {
        Ok(v) => Some(v),
        Err(err) => {
            debug!(what, error = %err, "steam: dropping undecodable payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scalar(v: Value) -> Scalar {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn scalars_coerce_like_loose_upstream_values() {
        assert_eq!(scalar(json!(570)).as_i64(), Some(570));
        assert_eq!(scalar(json!(" 570 ")).as_i64(), Some(570));
        assert_eq!(scalar(json!(12.9)).as_i64(), Some(12));
        assert_eq!(scalar(json!("bad")).as_i64(), None);
        assert_eq!(scalar(json!(true)).as_i64(), None);

        assert_eq!(scalar(json!("71.2")).as_f64(), Some(71.2));
        assert_eq!(scalar(json!(50)).as_f64(), Some(50.0));
        assert_eq!(scalar(json!("NaN")).as_f64(), None);
        assert_eq!(scalar(json!([1])).as_f64(), None);

        assert_eq!(scalar(json!(42)).as_text().as_deref(), Some("42"));
        assert!(scalar(json!({"x": 1})).as_text().is_none());
    }

    #[test]
    fn envelope_success_follows_truthiness() {
        let ok = AppDetailsEnvelope::decode(&json!({"success": true, "data": {}})).unwrap();
        assert!(ok.succeeded());
        let missing = AppDetailsEnvelope::decode(&json!({"data": {}})).unwrap();
        assert!(!missing.succeeded());
        assert!(AppDetailsEnvelope::decode(&json!("nope")).is_none());
    }

    #[test]
    fn data_must_be_an_object() {
        let env = AppDetailsEnvelope::decode(&json!({"success": true, "data": []})).unwrap();
        assert!(env.data().is_none());
        let env = AppDetailsEnvelope::decode(&json!({
            "success": true,
            "data": {"name": "Dota 2", "type": "game", "is_free": true, "extra": [1, 2]}
        }))
        .unwrap();
        let data = env.data().unwrap();
        assert_eq!(data.name, Some(Scalar::Text("Dota 2".into())));
        assert_eq!(data.kind, Some(Scalar::Text("game".into())));
        assert_eq!(data.is_free, Some(Scalar::Bool(true)));
    }

    #[test]
    fn achievement_entries_skip_non_objects() {
        let entries = AchievementEntry::decode_all(&json!({
            "achievementpercentages": {"achievements": [
                {"name": "ach1", "percent": 50},
                "garbage",
                {"name": null, "percent": 10}
            ]}
        }));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, None);
        assert!(AchievementEntry::decode_all(&Value::Null).is_empty());
        assert!(AchievementEntry::decode_all(&json!({"playerstats": {}})).is_empty());
    }

    #[test]
    fn owned_games_accept_both_envelopes() {
        let wrapped = OwnedGameEntry::decode_all(&json!({
            "response": {"game_count": 1, "games": [{"appid": 570}]}
        }));
        let bare = OwnedGameEntry::decode_all(&json!({"games": [{"appid": 570}]}));
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped[0].appid, Some(Scalar::Int(570)));
        assert!(OwnedGameEntry::decode_all(&json!({"response": {}})).is_empty());
    }
}

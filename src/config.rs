use std::time::Duration;

use thiserror::Error;

use crate::util::env::{db_url, env_opt, env_parse};

pub const DEFAULT_API_BASE_URL: &str = "https://api.steampowered.com";
pub const DEFAULT_STORE_BASE_URL: &str = "https://store.steampowered.com";

/// Operator-facing configuration problems. These are detected before any
/// network call or write and map to exit code 2.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("STEAM_API_KEY is required; set it in the environment or .env")]
    MissingApiKey,
    #[error("--apps must be a comma-separated list of integers (got {0:?})")]
    InvalidAppIds(String),
    #[error("provide --steamid or set STEAM_USER_ID64 when --owned is requested")]
    MissingSteamId,
    #[error("nothing to fetch: pass --apps and/or --owned")]
    NothingToFetch,
    #[error("{name} must be a valid URL (got {value:?})")]
    InvalidBaseUrl { name: &'static str, value: String },
    #[error("{0} must be a positive number")]
    NonPositive(&'static str),
}

/// Process configuration resolved from the environment (and `.env`).
#[derive(Clone)]
pub struct Settings {
    pub steam_api_key: String,
    pub database_url: String,
    pub steam_user_id64: Option<String>,
    pub http_timeout: Duration,
    pub api_base_url: url::Url,
    pub store_base_url: url::Url,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("steam_api_key", &"***")
            .field("database_url", &self.database_url)
            .field("steam_user_id64", &self.steam_user_id64)
            .field("http_timeout", &self.http_timeout)
            .field("api_base_url", &self.api_base_url.as_str())
            .field("store_base_url", &self.store_base_url.as_str())
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let steam_api_key = env_opt("STEAM_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        let timeout_secs: u64 = env_parse("STEAM_HTTP_TIMEOUT_SECS", 20);
        if timeout_secs == 0 {
            return Err(ConfigError::NonPositive("STEAM_HTTP_TIMEOUT_SECS"));
        }
        Ok(Self {
            steam_api_key,
            database_url: db_url(),
            steam_user_id64: env_opt("STEAM_USER_ID64"),
            http_timeout: Duration::from_secs(timeout_secs),
            api_base_url: base_url("STEAM_API_BASE_URL", DEFAULT_API_BASE_URL)?,
            store_base_url: base_url("STEAM_STORE_BASE_URL", DEFAULT_STORE_BASE_URL)?,
        })
    }
}

fn base_url(name: &'static str, default: &str) -> Result<url::Url, ConfigError> {
    let raw = env_opt(name).unwrap_or_else(|| default.to_string());
    parse_base_url(name, &raw)
}

/// Parse a base URL so later `join`s append to it rather than replace its last segment.
pub fn parse_base_url(name: &'static str, raw: &str) -> Result<url::Url, ConfigError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    url::Url::parse(&with_slash).map_err(|_| ConfigError::InvalidBaseUrl {
        name,
        value: raw.to_string(),
    })
}

/// Parse the operator's comma-separated id list. Blank segments are ignored;
/// anything else that is not an integer rejects the whole list.
pub fn parse_app_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ConfigError::InvalidAppIds(raw.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_list_tolerates_spaces_and_trailing_commas() {
        assert_eq!(parse_app_ids("570, 730,,440,").unwrap(), vec![570, 730, 440]);
        assert!(parse_app_ids("").unwrap().is_empty());
    }

    #[test]
    fn app_id_list_rejects_non_integers() {
        assert_eq!(
            parse_app_ids("570,dota"),
            Err(ConfigError::InvalidAppIds("570,dota".into()))
        );
    }

    #[test]
    fn base_urls_gain_a_trailing_slash() {
        let url = parse_base_url("X", "http://127.0.0.1:8080/steam").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/steam/");
        assert_eq!(
            url.join("api/appdetails").unwrap().as_str(),
            "http://127.0.0.1:8080/steam/api/appdetails"
        );
        assert!(parse_base_url("X", "not a url").is_err());
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let settings = Settings {
            steam_api_key: "super-secret".into(),
            database_url: "sqlite::memory:".into(),
            steam_user_id64: None,
            http_timeout: Duration::from_secs(20),
            api_base_url: parse_base_url("X", DEFAULT_API_BASE_URL).unwrap(),
            store_base_url: parse_base_url("X", DEFAULT_STORE_BASE_URL).unwrap(),
        };
        assert!(!format!("{settings:?}").contains("super-secret"));
    }
}

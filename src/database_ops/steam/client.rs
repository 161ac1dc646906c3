use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::Settings;

const OWNED_GAMES_PATH: &str = "IPlayerService/GetOwnedGames/v1/";
const GLOBAL_ACHIEVEMENTS_PATH: &str = "ISteamUserStats/GetGlobalAchievementPercentagesForApp/v2/";
const APP_DETAILS_PATH: &str = "api/appdetails";

/// Upstream statuses worth another attempt. Everything else is terminal.
const RETRYABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// A request that failed for good: retries exhausted or a non-retryable
/// answer. `url` never includes the query string, so the API key stays out
/// of logs and error chains.
#[derive(Debug, Error)]
pub enum ApiRequestError {
    #[error("GET {url} returned HTTP {status}")]
    Status { status: u16, url: String },
    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned an unreadable JSON body: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiRequestError {
    /// HTTP status of the final attempt, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiRequestError::Status { status, .. } => Some(*status),
            ApiRequestError::Transport { source, .. } | ApiRequestError::Decode { source, .. } => {
                source.status().map(|s| s.as_u16())
            }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ApiRequestError::Status { url, .. }
            | ApiRequestError::Transport { url, .. }
            | ApiRequestError::Decode { url, .. } => url,
        }
    }
}

/// Exponential backoff applied between attempts of one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Seconds; the wait before retry `n` is `backoff_factor * 2^(n-1)`.
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: 0.5,
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based). A server supplied
    /// `Retry-After` can only lengthen the wait.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exp = retry.saturating_sub(1).min(30) as i32;
        let secs = (self.backoff_factor * 2f64.powi(exp)).max(0.0);
        let backoff = Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()));
        match retry_after {
            Some(hint) if hint > backoff => hint.min(self.max_backoff),
            _ => backoff,
        }
    }
}

/// Fixed-interval limiter: consecutive requests are at least `interval`
/// apart, and idle time never builds up credit for a burst.
#[derive(Debug)]
pub struct RequestThrottle {
    interval: Duration,
    last_request: Option<Instant>,
}

impl RequestThrottle {
    /// Ceiling is floored at 0.1 requests per second.
    pub fn per_second(requests_per_second: f64) -> Self {
        let rps = requests_per_second.max(0.1);
        Self {
            interval: Duration::from_secs_f64(1.0 / rps),
            last_request: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                sleep(self.interval - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Everything needed to build a [`SteamClient`].
#[derive(Debug, Clone)]
pub struct SteamClientConfig {
    pub api_key: String,
    pub requests_per_second: f64,
    pub timeout: Duration,
    pub api_base_url: Url,
    pub store_base_url: Url,
    pub retry: RetryPolicy,
}

impl SteamClientConfig {
    pub fn from_settings(settings: &Settings, requests_per_second: f64) -> Self {
        Self {
            api_key: settings.steam_api_key.clone(),
            requests_per_second,
            timeout: settings.http_timeout,
            api_base_url: settings.api_base_url.clone(),
            store_base_url: settings.store_base_url.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Steam Web API + storefront client. All upstream traffic of a run goes
/// through one instance so the throttle sees every request.
pub struct SteamClient {
    http: Client,
    api_key: String,
    owned_games_url: Url,
    achievements_url: Url,
    app_details_url: Url,
    throttle: RequestThrottle,
    retry: RetryPolicy,
}

impl SteamClient {
    pub fn new(cfg: SteamClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .user_agent(concat!("steam-etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let owned_games_url = cfg
            .api_base_url
            .join(OWNED_GAMES_PATH)
            .context("invalid owned-games endpoint")?;
        let achievements_url = cfg
            .api_base_url
            .join(GLOBAL_ACHIEVEMENTS_PATH)
            .context("invalid global-achievements endpoint")?;
        let app_details_url = cfg
            .store_base_url
            .join(APP_DETAILS_PATH)
            .context("invalid appdetails endpoint")?;
        let throttle = RequestThrottle::per_second(cfg.requests_per_second);
        info!(
            interval_ms = throttle.interval().as_millis() as u64,
            max_retries = cfg.retry.max_retries,
            timeout_secs = cfg.timeout.as_secs(),
            "steam: HTTP client configured"
        );
        Ok(Self {
            http,
            api_key: cfg.api_key,
            owned_games_url,
            achievements_url,
            app_details_url,
            throttle,
            retry: cfg.retry,
        })
    }

    /// Owned games (with app names and free titles) for one account.
    #[instrument(skip(self))]
    pub async fn fetch_owned_games(&mut self, steamid: &str) -> Result<Value, ApiRequestError> {
        info!(steamid, "steam: fetching owned games");
        let url = self.owned_games_url.clone();
        let query = [
            ("key", self.api_key.clone()),
            ("steamid", steamid.to_string()),
            ("include_appinfo", "1".to_string()),
            ("include_played_free_games", "1".to_string()),
            ("format", "json".to_string()),
        ];
        self.get_json(url, &query).await
    }

    /// Population-wide achievement completion percentages for one app.
    #[instrument(skip(self))]
    pub async fn fetch_global_achievements(&mut self, appid: i64) -> Result<Value, ApiRequestError> {
        info!(appid, "steam: fetching global achievements");
        let url = self.achievements_url.clone();
        let query = [
            ("key", self.api_key.clone()),
            ("gameid", appid.to_string()),
            ("format", "json".to_string()),
        ];
        self.get_json(url, &query).await
    }

    /// Storefront details for `ids`, fetched `batch_size` ids per request and
    /// merged into one map keyed by the id string. Any failed batch aborts
    /// the whole fetch.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn fetch_app_details(
        &mut self,
        ids: &[i64],
        batch_size: usize,
    ) -> Result<Map<String, Value>, ApiRequestError> {
        let batch_size = batch_size.max(1);
        let mut results = Map::new();
        for (batch_idx, chunk) in ids.chunks(batch_size).enumerate() {
            let start = batch_idx * batch_size;
            info!(
                size = chunk.len(),
                range = %format!("{}-{}", start, start + chunk.len() - 1),
                "steam: fetching appdetails batch"
            );
            let id_list = chunk
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let url = self.app_details_url.clone();
            match self.get_json(url, &[("appids", id_list)]).await? {
                Value::Object(batch) => results.extend(batch),
                other => {
                    // Steam answers `null` for some unknown ids.
                    warn!(
                        batch = batch_idx,
                        kind = json_kind(&other),
                        "steam: appdetails batch was not an object; no entries taken"
                    );
                }
            }
        }
        Ok(results)
    }

    async fn get_json(
        &mut self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Value, ApiRequestError> {
        let display_url = url.to_string();
        let mut retries: u32 = 0;
        loop {
            self.throttle.wait().await;
            debug!(url = %display_url, attempt = retries + 1, "steam: GET");
            match self.http.get(url.clone()).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    debug!(url = %display_url, status = status.as_u16(), "steam: response");
                    if status.is_success() {
                        return resp.json::<Value>().await.map_err(|e| ApiRequestError::Decode {
                            url: display_url.clone(),
                            source: e.without_url(),
                        });
                    }
                    if RETRYABLE_STATUSES.contains(&status) && retries < self.retry.max_retries {
                        retries += 1;
                        let delay = self.retry.delay_for(retries, retry_after(&resp));
                        warn!(
                            url = %display_url,
                            status = status.as_u16(),
                            retry = retries,
                            delay_ms = delay.as_millis() as u64,
                            "steam: transient status; backing off"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(ApiRequestError::Status {
                        status: status.as_u16(),
                        url: display_url,
                    });
                }
                Err(err) => {
                    let err = err.without_url();
                    let transient = err.is_timeout() || err.is_connect();
                    if transient && retries < self.retry.max_retries {
                        retries += 1;
                        let delay = self.retry.delay_for(retries, None);
                        warn!(
                            url = %display_url,
                            error = %err,
                            retry = retries,
                            delay_ms = delay.as_millis() as u64,
                            "steam: transport error; backing off"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(ApiRequestError::Transport {
                        url: display_url,
                        source: err,
                    });
                }
            }
        }
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Client pointed at a mock server, with no backoff and an effectively
/// disabled throttle.
#[cfg(test)]
pub(crate) fn test_client(base_url: &str) -> SteamClient {
    SteamClient::new(test_client_config(base_url)).expect("client should build")
}

#[cfg(test)]
pub(crate) fn test_client_config(base_url: &str) -> SteamClientConfig {
    use crate::config::parse_base_url;

    SteamClientConfig {
        api_key: "test-key".into(),
        requests_per_second: 1000.0,
        timeout: Duration::from_secs(5),
        api_base_url: parse_base_url("api", base_url).expect("mock base url"),
        store_base_url: parse_base_url("store", base_url).expect("mock base url"),
        retry: RetryPolicy {
            max_retries: 5,
            backoff_factor: 0.0,
            max_backoff: Duration::from_millis(1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> SteamClient {
        test_client(&server.base_url())
    }

    #[test]
    fn backoff_doubles_from_half_a_second() {
        let policy = RetryPolicy::default();
        let waits: Vec<f64> = (1..=5)
            .map(|n| policy.delay_for(n, None).as_secs_f64())
            .collect();
        assert_eq!(waits, vec![0.5, 1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn retry_after_only_lengthens_the_wait() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(4, Some(Duration::from_secs(1))),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn throttle_floors_the_rate() {
        assert_eq!(RequestThrottle::per_second(0.0).interval(), Duration::from_secs(10));
        assert_eq!(
            RequestThrottle::per_second(4.0).interval(),
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn throttle_sleeps_between_requests() {
        let mut throttle = RequestThrottle::per_second(20.0);
        let delay = throttle.interval();

        // First call should be immediate.
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < delay);

        let start = Instant::now();
        throttle.wait().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= delay,
            "expected wait of at least {:?}, but got {:?}",
            delay,
            elapsed
        );
    }

    #[tokio::test]
    async fn batch_size_one_issues_one_call_per_id() {
        let server = MockServer::start_async().await;
        let dota = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "570");
                then.status(200)
                    .json_body(json!({"570": {"success": true, "data": {"name": "Dota 2"}}}));
            })
            .await;
        let cs = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "730");
                then.status(200)
                    .json_body(json!({"730": {"success": true, "data": {"name": "CS2"}}}));
            })
            .await;

        let mut client = client_for(&server);
        let result = client.fetch_app_details(&[570, 730], 1).await.unwrap();

        dota.assert_hits_async(1).await;
        cs.assert_hits_async(1).await;
        assert!(result.contains_key("570"));
        assert!(result.contains_key("730"));
    }

    #[tokio::test]
    async fn ids_are_joined_within_a_batch() {
        let server = MockServer::start_async().await;
        let both = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "570,730");
                then.status(200).json_body(json!({
                    "570": {"success": true},
                    "730": {"success": false}
                }));
            })
            .await;

        let mut client = client_for(&server);
        let result = client
            .fetch_app_details(&[570, 730], DEFAULT_BATCH_SIZE)
            .await
            .unwrap();

        both.assert_hits_async(1).await;
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn null_batches_contribute_no_entries() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/appdetails");
                then.status(200).body("null");
            })
            .await;

        let mut client = client_for(&server);
        let result = client.fetch_app_details(&[1], 1).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn transient_statuses_are_retried_until_the_budget_runs_out() {
        let server = MockServer::start_async().await;
        let unavailable = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ISteamUserStats/GetGlobalAchievementPercentagesForApp/v2/");
                then.status(503);
            })
            .await;

        let mut client = client_for(&server);
        let err = client.fetch_global_achievements(570).await.unwrap_err();

        unavailable.assert_hits_async(6).await;
        assert_eq!(err.status(), Some(503));
        assert!(err.url().ends_with("GetGlobalAchievementPercentagesForApp/v2/"));
    }

    #[tokio::test]
    async fn terminal_statuses_fail_without_retry() {
        let server = MockServer::start_async().await;
        let forbidden = server
            .mock_async(|when, then| {
                when.method(GET).path("/IPlayerService/GetOwnedGames/v1/");
                then.status(403);
            })
            .await;

        let mut client = client_for(&server);
        let err = client.fetch_owned_games("123").await.unwrap_err();

        forbidden.assert_hits_async(1).await;
        assert!(matches!(err, ApiRequestError::Status { status: 403, .. }));
        assert!(!err.to_string().contains("test-key"));
    }

    #[tokio::test]
    async fn timeouts_are_retried_like_transient_statuses() {
        let server = MockServer::start_async().await;
        let slow = server
            .mock_async(|when, then| {
                when.method(GET).path("/IPlayerService/GetOwnedGames/v1/");
                then.status(200)
                    .delay(Duration::from_millis(400))
                    .json_body(json!({"response": {"game_count": 0}}));
            })
            .await;

        let mut cfg = test_client_config(&server.base_url());
        cfg.timeout = Duration::from_millis(100);
        let mut client = SteamClient::new(cfg).unwrap();
        let err = client.fetch_owned_games("76561197960287930").await.unwrap_err();

        slow.assert_hits_async(6).await;
        assert!(matches!(err, ApiRequestError::Transport { .. }));
        assert_eq!(err.status(), None);
        let rendered = format!("{err} {err:?}");
        assert!(!rendered.contains("key="));
        assert!(!rendered.contains("test-key"));
    }

    #[tokio::test]
    async fn a_failed_batch_aborts_the_whole_fetch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "570");
                then.status(200).json_body(json!({"570": {"success": true}}));
            })
            .await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "730");
                then.status(404);
            })
            .await;
        let never = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/appdetails")
                    .query_param("appids", "440");
                then.status(200).json_body(json!({"440": {"success": true}}));
            })
            .await;

        let mut client = client_for(&server);
        let err = client.fetch_app_details(&[570, 730, 440], 1).await.unwrap_err();

        assert_eq!(err.status(), Some(404));
        missing.assert_hits_async(1).await;
        never.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn web_api_calls_carry_the_key() {
        let server = MockServer::start_async().await;
        let owned = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/IPlayerService/GetOwnedGames/v1/")
                    .query_param("key", "test-key")
                    .query_param("steamid", "76561197960287930")
                    .query_param("include_appinfo", "1");
                then.status(200)
                    .json_body(json!({"response": {"game_count": 0}}));
            })
            .await;

        let mut client = client_for(&server);
        let body = client.fetch_owned_games("76561197960287930").await.unwrap();

        owned.assert_hits_async(1).await;
        assert_eq!(body["response"]["game_count"], 0);
    }
}

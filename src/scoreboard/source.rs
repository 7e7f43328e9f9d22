//! Where scoreboard bytes come from.
//!
//! [`ScoreboardSource`] is the seam between the polling client and the
//! network: the real [`HttpSource`] issues GETs against the public API, and
//! tests swap in scripted sources.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};
use url::Url;

use crate::error::FetchError;

/// Public API host serving the per-sport scoreboard endpoints.
pub const DEFAULT_BASE_URL: &str = "https://site.api.espn.com";

/// A source of raw scoreboard payloads for one sport.
#[async_trait]
pub trait ScoreboardSource: Send + Sync {
    /// Fetch one raw payload.
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;

    /// Endpoint description for logging.
    fn endpoint(&self) -> &str;
}

/// HTTP source bound to one sport's scoreboard URL.
pub struct HttpSource {
    http: Client,
    url: Url,
}

impl HttpSource {
    /// Build a source for `sport_path` (e.g. "basketball/nba") under
    /// `base_url`, with a per-request `timeout`. Returns `None` when the
    /// path or base URL cannot form a scoreboard endpoint; callers treat
    /// that as an inert client rather than an error.
    pub fn new(base_url: &str, sport_path: &str, timeout: Duration) -> Option<Self> {
        let url = scoreboard_url(base_url, sport_path)?;
        let http = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                error!("failed to build HTTP client: {}", e);
                return None;
            }
        };
        Some(HttpSource { http, url })
    }
}

#[async_trait]
impl ScoreboardSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", self.url);

        let resp = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network { url: self.url.to_string(), source: e })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: self.url.to_string(), status });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Network { url: self.url.to_string(), source: e })?;

        Ok(body.to_vec())
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}

/// Derive the scoreboard URL for a sport path, or `None` when the path is
/// not in `sport/league` form.
fn scoreboard_url(base_url: &str, sport_path: &str) -> Option<Url> {
    if !valid_sport_path(sport_path) {
        return None;
    }
    let raw = format!(
        "{}/apis/site/v2/sports/{}/scoreboard",
        base_url.trim_end_matches('/'),
        sport_path
    );
    Url::parse(&raw).ok()
}

/// A sport path is two non-empty segments of lowercase ASCII letters, digits
/// and hyphens, like "basketball/nba" or "basketball/mens-college-basketball".
fn valid_sport_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    segments.len() == 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        })
}

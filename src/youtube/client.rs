use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::YoutubeSettings;
use crate::errors::IngestError;

use super::models::{RawResult, SearchListResponse};

/// Upper bound the search endpoint accepts for `maxResults`.
pub const MAX_RESULTS_LIMIT: u32 = 50;

const ERROR_BODY_LIMIT: usize = 512;

/// Anything that can answer a video search.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Returns at most `max_results` raw items, newest first. Never retries.
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<RawResult>, IngestError>;
}

#[derive(Clone, Debug)]
pub struct YoutubeSearchClient {
    http_client: Client,
    search_url: String,
    api_key: Secret<String>,
}

impl YoutubeSearchClient {
    pub fn new(settings: &YoutubeSettings) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            http_client,
            search_url: settings.search_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl VideoSource for YoutubeSearchClient {
    #[tracing::instrument(name = "Search YouTube videos", skip(self))]
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<RawResult>, IngestError> {
        let max_results = max_results.clamp(1, MAX_RESULTS_LIMIT);
        let max_results_param = max_results.to_string();

        let response = self
            .http_client
            .get(&self.search_url)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("order", "date"),
                ("maxResults", max_results_param.as_str()),
                ("key", self.api_key.expose_secret().as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = truncate(response.text().await.unwrap_or_default());
            error!(status = status.as_u16(), body = %body, "YouTube API error");
            return Err(classify_status(status, body, retry_after));
        }

        let body = response.text().await?;
        let data: SearchListResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse search response: {:?}", e);
            IngestError::BadResponse {
                status: status.as_u16(),
                body: format!("invalid JSON: {}", e),
            }
        })?;

        if data.items.len() > max_results as usize {
            warn!(
                returned = data.items.len(),
                max_results, "Search returned more items than requested, truncating"
            );
        }

        let items: Vec<RawResult> = data
            .items
            .into_iter()
            .take(max_results as usize)
            .map(RawResult)
            .collect();

        info!(count = items.len(), "Fetched search results");
        Ok(items)
    }
}

fn classify_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> IngestError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IngestError::Auth {
            status: status.as_u16(),
            body,
        },
        StatusCode::TOO_MANY_REQUESTS => IngestError::RateLimited { retry_after },
        _ => IngestError::BadResponse {
            status: status.as_u16(),
            body,
        },
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}

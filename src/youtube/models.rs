//! Wire types for the YouTube Data API v3 `search.list` endpoint.
//!
//! Every field is optional: the normalizer decides what is mandatory, so one
//! odd item never fails deserialization of the whole response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchListResponse {
    pub kind: Option<String>,
    pub next_page_token: Option<String>,
    pub page_info: Option<PageInfo>,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_results: Option<i64>,
    pub results_per_page: Option<i64>,
}

/// One untouched item of a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResult(pub serde_json::Value);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    pub id: Option<ItemId>,
    pub snippet: Option<VideoSnippet>,
}

/// `search.list` returns `{ kind, videoId }`, of which only the id is kept;
/// `videos.list` returns a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Plain(String),
    Resource(ResourceId),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: Option<String>,
}

impl SearchItem {
    pub fn video_id(&self) -> Option<&str> {
        let id = match self.id.as_ref()? {
            ItemId::Plain(id) => id.as_str(),
            ItemId::Resource(resource) => resource.video_id.as_deref()?,
        };
        let id = id.trim();
        (!id.is_empty()).then_some(id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub published_at: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnails: Option<Thumbnails>,
    pub channel_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Thumbnails {
    pub default: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    pub url: Option<String>,
    #[allow(dead_code)]
    pub width: Option<u32>,
    #[allow(dead_code)]
    pub height: Option<u32>,
}

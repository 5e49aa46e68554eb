//! Persistence for ingested videos.
//!
//! Both backends keep a single `videos` table keyed by `external_id`. Every
//! write goes through one conditional `INSERT .. ON CONFLICT .. DO UPDATE`
//! statement, so concurrent writers of the same id never interleave fields.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use postgres::PgVideoStore;
pub use sqlite::SqliteVideoStore;

/// A video as produced by the normalizer, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedVideo {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub channel_title: String,
}

/// A stored video row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub channel_title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub created: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoFilter {
    pub title_contains: Option<String>,
    pub channel_contains: Option<String>,
}

impl VideoFilter {
    pub fn title(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    pub fn channel(mut self, needle: impl Into<String>) -> Self {
        self.channel_contains = Some(needle.into());
        self
    }

    fn title_pattern(&self) -> Option<String> {
        non_blank(self.title_contains.as_deref()).map(like_pattern)
    }

    fn channel_pattern(&self) -> Option<String> {
        non_blank(self.channel_contains.as_deref()).map(like_pattern)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoPage {
    pub items: Vec<Video>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Inserts the video, or replaces every mutable field of the existing row
    /// with the same `external_id` and refreshes `updated_at`.
    async fn upsert(&self, video: &NormalizedVideo) -> Result<UpsertOutcome, sqlx::Error>;

    /// Returns one 1-based page sorted by `published_at` descending. Pages
    /// outside the result set come back empty.
    async fn query(&self, filter: &VideoFilter, page: u32, page_size: u32) -> Result<VideoPage, sqlx::Error>;

    async fn get(&self, external_id: &str) -> Result<Option<Video>, sqlx::Error>;

    /// Returns whether a row was removed.
    async fn delete(&self, external_id: &str) -> Result<bool, sqlx::Error>;

    /// Removes every row published strictly before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error>;

    async fn count(&self) -> Result<i64, sqlx::Error>;

    async fn ping(&self) -> Result<(), sqlx::Error>;
}

/// Offset window for a page request, `None` when the page cannot hold rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageWindow {
    pub page: u32,
    pub page_size: u32,
    pub offset: i64,
}

impl PageWindow {
    pub(crate) fn resolve(page: u32, page_size: u32, max_page_size: u32) -> (u32, Option<Self>) {
        let page_size = page_size.clamp(1, max_page_size.max(1));
        if page == 0 {
            return (page_size, None);
        }
        let offset = i64::from(page - 1) * i64::from(page_size);
        (
            page_size,
            Some(PageWindow {
                page,
                page_size,
                offset,
            }),
        )
    }
}

pub(crate) fn total_pages(total: i64, page_size: u32) -> i64 {
    let size = i64::from(page_size.max(1));
    (total + size - 1) / size
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Builds a `LIKE` pattern matching `needle` anywhere, escaping wildcards with `\`.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

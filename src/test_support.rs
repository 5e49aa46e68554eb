//! Doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::IngestSettings;
use crate::errors::IngestError;
use crate::ingest::CancelFlag;
use crate::store::{NormalizedVideo, UpsertOutcome, Video, VideoFilter, VideoPage, VideoStore};
use crate::youtube::{RawResult, VideoSource};

pub(crate) fn ingest_settings(concurrency: usize) -> IngestSettings {
    IngestSettings {
        concurrency,
        store_retries: 2,
        fetch_retries: 3,
        retry_base: Duration::from_millis(1),
        default_query: "cricket".to_string(),
        default_max_results: 10,
    }
}

/// A search item as the platform returns it, published on 2024-05-`day`.
pub(crate) fn raw_item(video_id: &str, day: u32) -> RawResult {
    RawResult(json!({
        "kind": "youtube#searchResult",
        "id": { "kind": "youtube#video", "videoId": video_id },
        "snippet": {
            "publishedAt": format!("2024-05-{:02}T00:00:00Z", day),
            "title": format!("Video {}", video_id),
            "description": "",
            "thumbnails": { "high": { "url": format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id) } },
            "channelTitle": "Cricket Daily"
        }
    }))
}

pub(crate) struct StubSource {
    scripted: Mutex<VecDeque<Result<Vec<RawResult>, IngestError>>>,
    fallback: Vec<RawResult>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubSource {
    /// Answers every call with the same items.
    pub(crate) fn fixed(items: Vec<RawResult>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: items,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Plays back `responses` in order, then answers with no items.
    pub(crate) fn scripted(responses: Vec<Result<Vec<RawResult>, IngestError>>) -> Self {
        Self {
            scripted: Mutex::new(responses.into()),
            ..Self::fixed(Vec::new())
        }
    }

    pub(crate) fn with_fallback(mut self, items: Vec<RawResult>) -> Self {
        self.fallback = items;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for StubSource {
    async fn search(&self, _query: &str, max_results: u32) -> Result<Vec<RawResult>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.scripted.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self.fallback.iter().take(max_results as usize).cloned().collect()),
        }
    }
}

/// Wraps a real store to inject failures and latency and to observe overlap.
pub(crate) struct InstrumentedStore<S> {
    inner: S,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    successes: AtomicUsize,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl<S: VideoStore> InstrumentedStore<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            successes: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    /// Fails the next `times` upserts of `external_id`; `u32::MAX` fails forever.
    pub(crate) fn failing(self, external_id: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(external_id.to_string(), times);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Raises `flag` once `n` upserts have succeeded.
    pub(crate) fn cancel_after(mut self, n: usize, flag: CancelFlag) -> Self {
        self.cancel_after = Some((n, flag));
        self
    }

    pub(crate) fn attempts_for(&self, external_id: &str) -> u32 {
        self.attempts.lock().unwrap().get(external_id).copied().unwrap_or(0)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, external_id: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(external_id) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl<S: VideoStore> VideoStore for InstrumentedStore<S> {
    async fn upsert(&self, video: &NormalizedVideo) -> Result<UpsertOutcome, sqlx::Error> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(video.external_id.clone())
            .or_default() += 1;
        let fail = self.should_fail(&video.external_id);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = if fail {
            Err(sqlx::Error::PoolTimedOut)
        } else {
            self.inner.upsert(video).await
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if result.is_ok() {
            let done = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((n, flag)) = &self.cancel_after {
                if done >= *n {
                    flag.cancel();
                }
            }
        }
        result
    }

    async fn query(&self, filter: &VideoFilter, page: u32, page_size: u32) -> Result<VideoPage, sqlx::Error> {
        self.inner.query(filter, page, page_size).await
    }

    async fn get(&self, external_id: &str) -> Result<Option<Video>, sqlx::Error> {
        self.inner.get(external_id).await
    }

    async fn delete(&self, external_id: &str) -> Result<bool, sqlx::Error> {
        self.inner.delete(external_id).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        self.inner.delete_older_than(cutoff).await
    }

    async fn count(&self) -> Result<i64, sqlx::Error> {
        self.inner.count().await
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        self.inner.ping().await
    }
}

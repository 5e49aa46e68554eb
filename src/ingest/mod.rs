//! Fetch -> normalize -> upsert for one search query.

pub mod sweeper;

use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IngestSettings;
use crate::errors::IngestError;
use crate::store::{NormalizedVideo, UpsertOutcome, VideoStore};
use crate::youtube::{normalize, RawResult, VideoSource};

pub use sweeper::{RetentionSweeper, SweepSummary};

const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Cooperative cancellation shared between a job handle and its worker.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub total_fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    /// Records never started because the job was cancelled.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Created,
    Updated,
    Failed,
    Skipped,
}

impl IngestSummary {
    fn from_outcomes(total_fetched: usize, outcomes: &[RecordOutcome]) -> Self {
        outcomes.iter().fold(
            IngestSummary {
                total_fetched,
                ..Default::default()
            },
            |mut summary, outcome| {
                match outcome {
                    RecordOutcome::Created => summary.created += 1,
                    RecordOutcome::Updated => summary.updated += 1,
                    RecordOutcome::Failed => summary.failed += 1,
                    RecordOutcome::Skipped => summary.skipped += 1,
                }
                summary
            },
        )
    }
}

impl IngestSummary {
    fn record_metrics(&self) {
        for (outcome, n) in [
            ("created", self.created),
            ("updated", self.updated),
            ("failed", self.failed),
            ("skipped", self.skipped),
        ] {
            if n > 0 {
                counter!("ingest_records_total", "outcome" => outcome).increment(n as u64);
            }
        }
    }
}

pub struct IngestService {
    source: Arc<dyn VideoSource>,
    store: Arc<dyn VideoStore>,
    concurrency: usize,
    store_retries: u32,
    store_retry_delay: Duration,
}

impl IngestService {
    pub fn new(source: Arc<dyn VideoSource>, store: Arc<dyn VideoStore>, settings: &IngestSettings) -> Self {
        Self {
            source,
            store,
            concurrency: settings.concurrency.max(1),
            store_retries: settings.store_retries,
            store_retry_delay: STORE_RETRY_DELAY,
        }
    }

    pub fn with_store_retry_delay(mut self, delay: Duration) -> Self {
        self.store_retry_delay = delay;
        self
    }

    /// Runs one ingestion with up to `concurrency` records in flight.
    ///
    /// Fails only when the fetch itself fails. Per-record failures are counted
    /// in `failed`, and the summary is built after every record has finished.
    #[tracing::instrument(name = "Ingest videos", skip(self, cancel), fields(concurrency = self.concurrency))]
    pub async fn ingest(&self, query: &str, max_results: u32, cancel: &CancelFlag) -> Result<IngestSummary, IngestError> {
        let raw_results = self.source.search(query, max_results).await?;
        let total_fetched = raw_results.len();

        let outcomes: Vec<RecordOutcome> = stream::iter(raw_results)
            .map(|raw| self.process_unless_cancelled(raw, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let summary = IngestSummary::from_outcomes(total_fetched, &outcomes);
        summary.record_metrics();
        info!(?summary, "Ingestion finished");
        Ok(summary)
    }

    /// Same contract as [`IngestService::ingest`], one record at a time.
    #[tracing::instrument(name = "Ingest videos sequentially", skip(self, cancel))]
    pub async fn ingest_sequential(
        &self,
        query: &str,
        max_results: u32,
        cancel: &CancelFlag,
    ) -> Result<IngestSummary, IngestError> {
        let raw_results = self.source.search(query, max_results).await?;
        let total_fetched = raw_results.len();

        let mut outcomes = Vec::with_capacity(total_fetched);
        for raw in raw_results {
            outcomes.push(self.process_unless_cancelled(raw, cancel).await);
        }

        let summary = IngestSummary::from_outcomes(total_fetched, &outcomes);
        summary.record_metrics();
        info!(?summary, "Ingestion finished");
        Ok(summary)
    }

    async fn process_unless_cancelled(&self, raw: RawResult, cancel: &CancelFlag) -> RecordOutcome {
        if cancel.is_cancelled() {
            return RecordOutcome::Skipped;
        }
        match self.process_record(raw).await {
            Ok(outcome) if outcome.created => RecordOutcome::Created,
            Ok(_) => RecordOutcome::Updated,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Skipping record");
                RecordOutcome::Failed
            }
        }
    }

    async fn process_record(&self, raw: RawResult) -> Result<UpsertOutcome, IngestError> {
        let video = normalize(raw)?;
        self.upsert_with_retry(&video).await
    }

    async fn upsert_with_retry(&self, video: &NormalizedVideo) -> Result<UpsertOutcome, IngestError> {
        let mut attempt = 0;
        loop {
            match self.store.upsert(video).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.store_retries => {
                    attempt += 1;
                    debug!(
                        external_id = %video.external_id,
                        attempt,
                        error = %e,
                        "Upsert failed, retrying"
                    );
                    tokio::time::sleep(self.store_retry_delay * attempt).await;
                }
                Err(e) => return Err(IngestError::Store(e)),
            }
        }
    }
}

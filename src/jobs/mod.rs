//! Background jobs for ingestion and retention sweeps.
//!
//! `submit` hands back a `JobHandle` immediately and the work runs on the tokio
//! runtime, gated by a semaphore sized to the job pool. Outcomes (including
//! failures and panics) are recorded on the handle and never reach the caller
//! that triggered the job.

pub mod schedule;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::IngestError;
use crate::ingest::{CancelFlag, IngestService, IngestSummary, RetentionSweeper, SweepSummary};

pub use schedule::{spawn_recurring, Schedule};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    Ingest { query: String, max_results: u32 },
    Sweep { max_age_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutput {
    Ingest(IngestSummary),
    Sweep(SweepSummary),
}

/// Snapshot of a job, safe to hand out and serialize.
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub attempts: u32,
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first for retryable fetch failures.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff, except that a server-provided `Retry-After` wins.
    fn delay_for(&self, attempt: u32, err: &IngestError) -> Duration {
        if let IngestError::RateLimited {
            retry_after: Some(retry_after),
        } = err
        {
            return (*retry_after).min(MAX_BACKOFF);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

struct JobEntry {
    handle: JobHandle,
    cancel: CancelFlag,
}

struct Inner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    ingest: Arc<IngestService>,
    sweeper: RetentionSweeper,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    history_limit: usize,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

enum Completion {
    Done(JobOutput),
    Failed(String),
    Cancelled(Option<JobOutput>),
}

impl JobManager {
    pub fn new(
        ingest: Arc<IngestService>,
        sweeper: RetentionSweeper,
        max_concurrent_jobs: usize,
        retry: RetryPolicy,
        history_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                ingest,
                sweeper,
                permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                retry,
                history_limit,
            }),
        }
    }

    /// Queues a job and returns its handle without waiting for it to run.
    #[tracing::instrument(name = "Submit job", skip(self))]
    pub fn submit(&self, kind: JobKind) -> JobHandle {
        let handle = JobHandle {
            id: Uuid::new_v4(),
            kind: kind.clone(),
            status: JobStatus::Queued,
            attempts: 0,
            output: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let cancel = CancelFlag::new();

        {
            let mut jobs = self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            jobs.insert(
                handle.id,
                JobEntry {
                    handle: handle.clone(),
                    cancel: cancel.clone(),
                },
            );
            prune_finished(&mut jobs, self.inner.history_limit);
        }

        info!(job_id = %handle.id, ?kind, "Job queued");

        let manager = self.clone();
        let id = handle.id;
        tokio::spawn(async move {
            manager.run(id, kind, cancel).await;
        });

        handle
    }

    pub fn status(&self, id: Uuid) -> Option<JobHandle> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|entry| entry.handle.clone())
    }

    /// Newest first.
    pub fn list(&self) -> Vec<JobHandle> {
        let mut handles: Vec<JobHandle> = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        handles.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        handles
    }

    /// Requests cancellation. A queued job is cancelled on the spot; a running
    /// one stops before its next record. Finished jobs are left alone.
    #[tracing::instrument(name = "Cancel job", skip(self))]
    pub fn cancel(&self, id: Uuid) -> Option<JobHandle> {
        let mut jobs = self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.get_mut(&id)?;
        if !entry.handle.status.is_finished() {
            entry.cancel.cancel();
            if entry.handle.status == JobStatus::Queued {
                entry.handle.status = JobStatus::Cancelled;
                entry.handle.finished_at = Some(Utc::now());
            }
            info!(job_id = %id, status = ?entry.handle.status, "Cancellation requested");
        }
        Some(entry.handle.clone())
    }

    async fn run(&self, id: Uuid, kind: JobKind, cancel: CancelFlag) {
        let _permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.finish(id, Completion::Failed("job pool is closed".to_string()));
                return;
            }
        };

        if !self.mark_running(id) {
            return;
        }
        info!(job_id = %id, "Job started");

        // Run the work in its own task so a panic is recorded instead of
        // leaving the handle stuck in `Running`.
        let manager = self.clone();
        let work = tokio::spawn(async move { manager.execute(id, kind, &cancel).await });

        let completion = match work.await {
            Ok(Ok(JobOutput::Ingest(summary))) if summary.skipped > 0 => {
                Completion::Cancelled(Some(JobOutput::Ingest(summary)))
            }
            Ok(Ok(output)) => Completion::Done(output),
            Ok(Err(IngestError::Cancelled)) => Completion::Cancelled(None),
            Ok(Err(e)) => Completion::Failed(e.to_string()),
            Err(join_error) => Completion::Failed(format!("job panicked: {}", join_error)),
        };
        self.finish(id, completion);
    }

    async fn execute(&self, id: Uuid, kind: JobKind, cancel: &CancelFlag) -> Result<JobOutput, IngestError> {
        match kind {
            JobKind::Ingest { query, max_results } => self.execute_ingest(id, &query, max_results, cancel).await,
            JobKind::Sweep { max_age_secs } => {
                self.update(id, |handle| handle.attempts = 1);
                let summary = self.inner.sweeper.sweep(Duration::from_secs(max_age_secs)).await?;
                Ok(JobOutput::Sweep(summary))
            }
        }
    }

    async fn execute_ingest(
        &self,
        id: Uuid,
        query: &str,
        max_results: u32,
        cancel: &CancelFlag,
    ) -> Result<JobOutput, IngestError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.update(id, |handle| handle.attempts = attempt);

            match self.inner.ingest.ingest(query, max_results, cancel).await {
                Ok(summary) => return Ok(JobOutput::Ingest(summary)),
                Err(e) if e.is_retryable() && attempt <= self.inner.retry.max_retries => {
                    let delay = self.inner.retry.delay_for(attempt, &e);
                    warn!(job_id = %id, attempt, ?delay, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    if cancel.is_cancelled() {
                        return Err(IngestError::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Moves a queued job to `Running`. Returns false when the job was
    /// cancelled (or pruned) before it got a permit.
    fn mark_running(&self, id: Uuid) -> bool {
        self.update(id, |handle| {
            if handle.status != JobStatus::Queued {
                return false;
            }
            handle.status = JobStatus::Running;
            handle.started_at = Some(Utc::now());
            true
        })
        .unwrap_or(false)
    }

    fn update<F, R>(&self, id: Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&mut JobHandle) -> R,
    {
        let mut jobs = self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get_mut(&id).map(|entry| f(&mut entry.handle))
    }

    fn finish(&self, id: Uuid, completion: Completion) {
        self.update(id, |handle| {
            handle.finished_at = Some(Utc::now());
            match completion {
                Completion::Done(output) => {
                    handle.status = JobStatus::Succeeded;
                    handle.output = Some(output);
                    info!(job_id = %id, "Job succeeded");
                }
                Completion::Failed(message) => {
                    handle.status = JobStatus::Failed;
                    error!(job_id = %id, error = %message, "Job failed");
                    handle.error = Some(message);
                }
                Completion::Cancelled(output) => {
                    handle.status = JobStatus::Cancelled;
                    handle.output = output;
                    info!(job_id = %id, "Job cancelled");
                }
            }
            counter!("jobs_finished_total", "status" => handle.status.as_str()).increment(1);
        });
    }
}

/// Drops the oldest finished jobs beyond `limit`. Unfinished jobs always stay.
fn prune_finished(jobs: &mut HashMap<Uuid, JobEntry>, limit: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .values()
        .filter(|entry| entry.handle.status.is_finished())
        .map(|entry| {
            (
                entry.handle.finished_at.unwrap_or(entry.handle.submitted_at),
                entry.handle.id,
            )
        })
        .collect();
    if finished.len() <= limit {
        return;
    }
    finished.sort();
    let excess = finished.len() - limit;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}

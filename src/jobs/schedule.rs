//! Recurring ingestion and retention sweeps.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::{JobKind, JobManager};

#[derive(Debug, Clone)]
pub struct Schedule {
    pub ingest_every: Option<Duration>,
    pub sweep_every: Option<Duration>,
    pub query: String,
    pub max_results: u32,
    pub retention: Duration,
}

/// Spawns a loop that submits jobs on each tick until `shutdown` fires.
///
/// A tick is skipped while the previous job of the same kind is unfinished,
/// so a slow run never piles up behind itself.
pub fn spawn_recurring(
    manager: JobManager,
    schedule: Schedule,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            ingest_every = ?schedule.ingest_every,
            sweep_every = ?schedule.sweep_every,
            query = %schedule.query,
            "Starting recurring jobs"
        );

        let mut ingest_ticks = schedule.ingest_every.map(skipping_interval);
        let mut sweep_ticks = schedule.sweep_every.map(skipping_interval);
        let mut last_ingest: Option<Uuid> = None;
        let mut last_sweep: Option<Uuid> = None;

        loop {
            tokio::select! {
                _ = tick(&mut ingest_ticks) => {
                    let kind = JobKind::Ingest {
                        query: schedule.query.clone(),
                        max_results: schedule.max_results,
                    };
                    submit_unless_busy(&manager, &mut last_ingest, kind);
                }
                _ = tick(&mut sweep_ticks) => {
                    let kind = JobKind::Sweep {
                        max_age_secs: schedule.retention.as_secs(),
                    };
                    submit_unless_busy(&manager, &mut last_sweep, kind);
                }
                _ = shutdown.recv() => {
                    info!("Stopping recurring jobs");
                    break;
                }
            }
        }
    })
}

fn skipping_interval(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn submit_unless_busy(manager: &JobManager, last: &mut Option<Uuid>, kind: JobKind) {
    let busy = last
        .and_then(|id| manager.status(id))
        .map(|handle| !handle.status.is_finished())
        .unwrap_or(false);
    if busy {
        debug!(?kind, "Previous run still in progress, skipping tick");
        return;
    }
    *last = Some(manager.submit(kind).id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestService, RetentionSweeper};
    use crate::jobs::{JobStatus, RetryPolicy};
    use crate::store::sqlite::tests::memory_store;
    use crate::store::VideoStore;
    use crate::test_support::{ingest_settings, raw_item, StubSource};
    use std::sync::Arc;

    #[tokio::test]
    async fn ticks_submit_jobs_until_shutdown() {
        let store: Arc<dyn VideoStore> = Arc::new(memory_store().await);
        let source = Arc::new(StubSource::fixed(vec![raw_item("a", 1)]));
        let ingest = IngestService::new(source.clone(), store.clone(), &ingest_settings(2));
        let manager = JobManager::new(
            Arc::new(ingest),
            RetentionSweeper::new(store.clone()),
            2,
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
            100,
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let schedule = Schedule {
            ingest_every: Some(Duration::from_millis(30)),
            sweep_every: None,
            query: "cricket".into(),
            max_results: 5,
            retention: Duration::from_secs(86_400),
        };
        let task = spawn_recurring(manager.clone(), schedule, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        let jobs = manager.list();
        assert!(jobs.len() >= 2, "expected several runs, got {}", jobs.len());
        assert!(jobs
            .iter()
            .all(|job| matches!(job.kind, JobKind::Ingest { ref query, max_results: 5 } if query == "cricket")));
        assert_eq!(store.count().await.unwrap(), 1);

        let submitted = jobs.len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.list().len(), submitted);
        assert!(manager
            .list()
            .iter()
            .any(|job| job.status == JobStatus::Succeeded));
    }

    #[tokio::test]
    async fn disabled_schedule_submits_nothing() {
        let store: Arc<dyn VideoStore> = Arc::new(memory_store().await);
        let ingest = IngestService::new(Arc::new(StubSource::fixed(Vec::new())), store.clone(), &ingest_settings(1));
        let manager = JobManager::new(
            Arc::new(ingest),
            RetentionSweeper::new(store),
            1,
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
            10,
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let schedule = Schedule {
            ingest_every: None,
            sweep_every: None,
            query: "cricket".into(),
            max_results: 5,
            retention: Duration::from_secs(86_400),
        };
        let task = spawn_recurring(manager.clone(), schedule, shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert!(manager.list().is_empty());
    }
}

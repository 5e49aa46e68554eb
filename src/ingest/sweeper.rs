use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::errors::IngestError;
use crate::store::VideoStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub deleted_count: u64,
    pub cutoff: DateTime<Utc>,
}

/// Deletes videos published longer than a given age ago.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn VideoStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        Self { store }
    }

    pub async fn sweep(&self, max_age: Duration) -> Result<SweepSummary, IngestError> {
        self.sweep_at(Utc::now(), max_age).await
    }

    #[tracing::instrument(name = "Retention sweep", skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>, max_age: Duration) -> Result<SweepSummary, IngestError> {
        // Cutoffs before the epoch keep everything and never reach the store;
        // Postgres cannot represent the far end of chrono's range.
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .filter(|cutoff| *cutoff >= DateTime::<Utc>::UNIX_EPOCH);
        let Some(cutoff) = cutoff else {
            info!(?max_age, "Retention age reaches before the epoch, nothing to delete");
            return Ok(SweepSummary {
                deleted_count: 0,
                cutoff: DateTime::<Utc>::UNIX_EPOCH,
            });
        };

        let deleted_count = self.store.delete_older_than(cutoff).await?;
        info!(deleted_count, %cutoff, "Retention sweep finished");
        Ok(SweepSummary { deleted_count, cutoff })
    }
}

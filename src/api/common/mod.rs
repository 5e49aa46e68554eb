//! Request/response types shared by the HTTP handlers.

pub mod tracing;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PaginationSettings;

/// Standard pagination parameters. Pages are 1-based.
#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PaginationParams {
    /// Resolves missing values against the configured defaults. Oversized
    /// pages are capped by the store.
    pub fn resolve(&self, settings: &PaginationSettings) -> (u32, u32) {
        (
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(settings.default_page_size),
        )
    }
}

/// Body of every `202 Accepted` that hands back a background job.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pagination_falls_back_to_defaults() {
        let settings = PaginationSettings {
            default_page_size: 10,
            max_page_size: 100,
        };
        assert_eq!(PaginationParams::default().resolve(&settings), (1, 10));

        let params = PaginationParams {
            page: Some(3),
            page_size: Some(25),
        };
        assert_eq!(params.resolve(&settings), (3, 25));
    }
}

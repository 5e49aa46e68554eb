use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error as StdError;
use std::time::Duration;

/// Failures of the ingestion pipeline.
///
/// Fetch-level variants (`Transport`, `RateLimited`, `Auth`, `BadResponse`)
/// abort a whole ingest call. `MalformedRecord` and `Store` are per-record and
/// get folded into the summary by the orchestrator.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("Transport error: {cause}")]
    Transport { cause: String },

    #[error("Rate limited by remote API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Remote API rejected credentials (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("Unexpected response from remote API (HTTP {status}): {body}")]
    BadResponse { status: u16, body: String },

    #[error("Malformed record: {reason}")]
    MalformedRecord { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Job was cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        IngestError::MalformedRecord {
            reason: reason.into(),
        }
    }

    /// Transport, rate limiting and store failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Transport { .. } | IngestError::RateLimited { .. } | IngestError::Store(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Transport { .. } => "transport",
            IngestError::RateLimited { .. } => "rate_limited",
            IngestError::Auth { .. } => "auth",
            IngestError::BadResponse { .. } => "bad_response",
            IngestError::MalformedRecord { .. } => "malformed_record",
            IngestError::Store(_) => "store",
            IngestError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        let error_type = match &err {
            e if e.is_timeout() => "request timed out",
            e if e.is_connect() => "connection failed",
            e if e.is_decode() => "response decode failed",
            e if e.is_redirect() => "redirect loop or invalid redirect",
            e if e.is_request() => "invalid request",
            e if e.is_body() => "request body error",
            _ => "unknown HTTP error",
        };

        // reqwest embeds the full URL (including the API key) in its Display output.
        let err = err.without_url();

        tracing::error!(
            error = %err,
            is_timeout = err.is_timeout(),
            is_connect = err.is_connect(),
            "Search request failed at the transport level"
        );

        IngestError::Transport {
            cause: format!("{}: {}", error_type, err),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External service error: {0}")]
    ExternalService(#[source] anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("An unexpected error occurred: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", e),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ExternalService(e) => (
                StatusCode::BAD_GATEWAY,
                format!("External service error: {}", e),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unexpected(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An unexpected error occurred: {}", e),
            ),
        };

        tracing::error!(
            error_type = %self,
            error_message = %error_message,
            status_code = %status,
            "Request error"
        );

        if let AppError::Unexpected(e) | AppError::Database(e) = &self {
            let mut source_chain = String::new();
            let mut current_err: Option<&(dyn StdError + 'static)> = Some(e.as_ref());
            while let Some(err) = current_err {
                source_chain.push_str(&format!("\n  Caused by: {}", err));
                current_err = err.source();
            }
            if !source_chain.is_empty() {
                tracing::error!("Error source chain:{}", source_chain);
            }
        }

        let body = Json(json!({
            "message": error_message,
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Database record not found".to_string()),
            _ => AppError::Database(anyhow::Error::new(err).context("SQLx operation failed")),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Store(e) => AppError::from(e),
            IngestError::MalformedRecord { reason } => AppError::Validation(reason),
            other => AppError::ExternalService(anyhow::Error::new(other)),
        }
    }
}

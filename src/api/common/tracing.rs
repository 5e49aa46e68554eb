//! Request/response callbacks for `tower_http::trace::TraceLayer`.

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, Uri};
use std::collections::HashMap;
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tracing::{info_span, Span};

const REDACTED: &str = "[REDACTED]";

/// Opens the span every log line of a request is recorded under.
pub fn make_request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri().path(),
        query = ?redacted_query(request.uri()),
        version = ?request.version(),
        request_id = request_id,
        user_agent = ?request.headers().get("user-agent"),
    )
}

pub fn on_request(request: &Request<Body>, _span: &Span) {
    tracing::info!(
        method = %request.method(),
        path = %request.uri().path(),
        headers = ?redacted_headers(request.headers()),
        "Incoming HTTP request"
    );
}

pub fn on_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    let status = response.status();
    let latency_ms = latency.as_millis();

    match status.as_u16() {
        400..=499 => tracing::warn!(status = %status, latency_ms, "HTTP request completed with client error"),
        500..=599 => tracing::error!(status = %status, latency_ms, "HTTP request completed with server error"),
        _ => tracing::info!(status = %status, latency_ms, "HTTP request completed"),
    }
}

pub fn on_failure(error: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    let error_type = match &error {
        ServerErrorsFailureClass::StatusCode(code) => format!("HTTP {}", code.as_u16()),
        ServerErrorsFailureClass::Error(_) => "Internal Error".to_string(),
    };

    tracing::error!(
        error = %error,
        latency_ms = latency.as_millis(),
        error_type = error_type,
        "HTTP request failed"
    );
}

fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("authorization") || name.contains("cookie") || name.contains("token") || name.contains("key")
}

fn redacted_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            if is_sensitive(name.as_str()) {
                Some((name.to_string(), REDACTED.to_string()))
            } else {
                value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
            }
        })
        .collect()
}

/// The query string with the values of credential-like parameters masked.
fn redacted_query(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    let masked: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| {
            if is_sensitive(&name) {
                format!("{}={}", name, REDACTED)
            } else {
                format!("{}={}", name, value)
            }
        })
        .collect();
    Some(masked.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_query_params_are_masked() {
        let uri: Uri = "/videos?query=cricket&key=abc123&page=2".parse().unwrap();
        let query = redacted_query(&uri).unwrap();
        assert_eq!(query, "query=cricket&key=[REDACTED]&page=2");
        assert!(redacted_query(&"/videos".parse::<Uri>().unwrap()).is_none());
    }

    #[test]
    fn sensitive_headers_are_masked() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("x-api-key", "secret".parse().unwrap());
        headers.insert("accept", "application/json".parse().unwrap());

        let logged = redacted_headers(&headers);
        assert_eq!(logged["authorization"], REDACTED);
        assert_eq!(logged["x-api-key"], REDACTED);
        assert_eq!(logged["accept"], "application/json");
    }
}

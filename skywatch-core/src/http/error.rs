//! HTTP error mapping utilities

use crate::error::{ClientError, LimitOrigin};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Longest error body excerpt carried into a message
const MAX_DETAIL_LEN: usize = 200;

/// Map a non-success HTTP status and response body to a ClientError
pub fn map_http_error(
    provider: &str,
    status: StatusCode,
    headers: Option<&HeaderMap>,
    body: Option<String>,
    request_id: Uuid,
) -> ClientError {
    let detail = body
        .as_deref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| extract_error_message(&v))
        .or_else(|| body.as_deref().map(str::trim).filter(|b| !b.is_empty()).map(str::to_string))
        .map(truncate)
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    let message = format!("HTTP {}: {} [request_id: {}]", status.as_u16(), detail, request_id);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth {
            provider: provider.to_string(),
            status: status.as_u16(),
        },

        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = headers
                .and_then(|h| h.get(RETRY_AFTER))
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);

            ClientError::RateLimitExceeded {
                provider: provider.to_string(),
                origin: LimitOrigin::Provider,
                retry_after,
                retries: 0,
            }
        }

        StatusCode::REQUEST_TIMEOUT => ClientError::TransientNetwork {
            provider: provider.to_string(),
            message,
            status: Some(status.as_u16()),
            retries: 0,
        },

        status if status.is_server_error() => ClientError::TransientNetwork {
            provider: provider.to_string(),
            message,
            status: Some(status.as_u16()),
            retries: 0,
        },

        status => ClientError::Validation {
            message,
            status: Some(status.as_u16()),
        },
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_DETAIL_LEN {
        let mut end = MAX_DETAIL_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

/// Extract a human-readable message from common JSON error shapes
fn extract_error_message(json: &Value) -> Option<String> {
    // { "error": { "message": "...", "code": "..." } } (api.nasa.gov gateway)
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }

    // { "message": "..." } or { "msg": "..." }
    for field in ["message", "msg", "detail"] {
        if let Some(message) = json.get(field).and_then(|v| v.as_str()) {
            return Some(message.to_string());
        }
    }

    None
}

/// Parse a Retry-After header value given in seconds
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
    }

    // HTTP-date form is not supported
    None
}
